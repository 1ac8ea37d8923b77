//! Status helper enums mapping to SMALLINT lookup tables.
//!
//! Each enum variant's discriminant matches the seed data order (1-based)
//! in the corresponding `*_statuses` / `*_lanes` / `*_states` database
//! table.

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:expr ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Map a raw database ID back to the enum, `None` for
            /// unknown values (version skew).
            pub fn from_id(id: StatusId) -> Option<Self> {
                match id {
                    $( $val => Some(Self::$variant), )+
                    _ => None,
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }
    };
}

define_status_enum! {
    /// One-shot task lifecycle status.
    TaskStatus {
        Queued = 1,
        Started = 2,
        Success = 3,
        Error = 4,
        Aborted = 5,
    }
}

define_status_enum! {
    /// Queue lane a task was submitted on.
    TaskLane {
        Sync = 1,
        Async = 2,
    }
}

define_status_enum! {
    /// Perpetual task assignment state.
    PerpetualTaskState {
        Unassigned = 1,
        Assigned = 2,
        Paused = 3,
    }
}

/// Terminal task statuses: success, error, aborted.
pub const TERMINAL_TASK_STATUSES: [StatusId; 3] = [
    TaskStatus::Success as StatusId,
    TaskStatus::Error as StatusId,
    TaskStatus::Aborted as StatusId,
];

impl TaskStatus {
    /// Whether this status is terminal (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        TERMINAL_TASK_STATUSES.contains(&self.id())
    }
}
