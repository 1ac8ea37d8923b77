//! Delivery filtering and capability validation for delegate dispatch.
//!
//! Pure functions only. The same task may be evaluated concurrently
//! against many connections, so everything here is side-effect-free and
//! idempotent by construction.

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum length of a delegate or account identifier.
const MAX_ID_LEN: usize = 128;

/// Maximum number of capability tags a delegate or task may carry.
const MAX_CAPABILITIES: usize = 32;

/// Maximum length of a single capability tag.
const MAX_CAPABILITY_LEN: usize = 64;

// ---------------------------------------------------------------------------
// Delivery predicate
// ---------------------------------------------------------------------------

/// Decide whether a task should be delivered to a given delegate.
///
/// Delivery proceeds only when:
/// - the delegate advertises every capability the task requires, and
/// - the task is not already owned by a *different* delegate.
///
/// A task the evaluated delegate itself owns still passes: re-delivery to
/// the owner is harmless and covers the redelivery-after-reconnect path.
pub fn should_deliver(
    required_capabilities: &[String],
    delegate_capabilities: &[String],
    task_owner: Option<&str>,
    delegate_id: &str,
) -> bool {
    if let Some(owner) = task_owner {
        if owner != delegate_id {
            return false;
        }
    }

    count_matching_capabilities(delegate_capabilities, required_capabilities)
        == required_capabilities.len()
}

/// Count how many of `required` capabilities are present in `advertised`.
///
/// If the returned value equals `required.len()`, the delegate satisfies
/// every required capability. Also used to rank candidates when more than
/// one delegate is eligible.
pub fn count_matching_capabilities(advertised: &[String], required: &[String]) -> usize {
    required
        .iter()
        .filter(|req| advertised.iter().any(|cap| cap == *req))
        .count()
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a delegate or account identifier.
///
/// Rules:
/// - Must not be empty.
/// - Must not exceed `MAX_ID_LEN` characters.
/// - Must contain only alphanumeric, hyphen, underscore, or dot characters.
pub fn validate_party_id(kind: &'static str, id: &str) -> Result<(), CoreError> {
    if id.is_empty() {
        return Err(CoreError::Validation(format!(
            "{kind} id must not be empty"
        )));
    }
    if id.len() > MAX_ID_LEN {
        return Err(CoreError::Validation(format!(
            "{kind} id must not exceed {MAX_ID_LEN} characters"
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(CoreError::Validation(format!(
            "{kind} id may only contain alphanumeric, hyphen, underscore, or dot characters"
        )));
    }
    Ok(())
}

/// Validate a set of capability tags.
///
/// Rules:
/// - At most `MAX_CAPABILITIES` tags.
/// - Each tag must not be empty and must not exceed `MAX_CAPABILITY_LEN`
///   characters.
/// - No duplicates.
pub fn validate_capabilities(capabilities: &[String]) -> Result<(), CoreError> {
    if capabilities.len() > MAX_CAPABILITIES {
        return Err(CoreError::Validation(format!(
            "At most {MAX_CAPABILITIES} capability tags are allowed"
        )));
    }
    for (i, cap) in capabilities.iter().enumerate() {
        if cap.is_empty() {
            return Err(CoreError::Validation(format!(
                "Capability at index {i} must not be empty"
            )));
        }
        if cap.len() > MAX_CAPABILITY_LEN {
            return Err(CoreError::Validation(format!(
                "Capability at index {i} exceeds {MAX_CAPABILITY_LEN} characters"
            )));
        }
    }

    let mut seen = std::collections::HashSet::with_capacity(capabilities.len());
    for cap in capabilities {
        if !seen.insert(cap.as_str()) {
            return Err(CoreError::Validation(format!(
                "Duplicate capability: \"{cap}\""
            )));
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(tags: &[&str]) -> Vec<String> {
        tags.iter().map(|t| t.to_string()).collect()
    }

    // -- should_deliver -------------------------------------------------------

    #[test]
    fn delivers_when_no_capabilities_required() {
        assert!(should_deliver(&[], &caps(&["linux"]), None, "d1"));
    }

    #[test]
    fn delivers_when_all_required_present() {
        let required = caps(&["linux", "docker"]);
        let advertised = caps(&["docker", "linux", "gpu"]);
        assert!(should_deliver(&required, &advertised, None, "d1"));
    }

    #[test]
    fn rejects_when_capability_missing() {
        let required = caps(&["linux", "docker"]);
        let advertised = caps(&["linux"]);
        assert!(!should_deliver(&required, &advertised, None, "d1"));
    }

    #[test]
    fn rejects_when_owned_by_other_delegate() {
        assert!(!should_deliver(&[], &[], Some("d2"), "d1"));
    }

    #[test]
    fn delivers_to_current_owner() {
        assert!(should_deliver(&[], &[], Some("d1"), "d1"));
    }

    #[test]
    fn predicate_is_idempotent() {
        let required = caps(&["linux"]);
        let advertised = caps(&["linux"]);
        let first = should_deliver(&required, &advertised, None, "d1");
        let second = should_deliver(&required, &advertised, None, "d1");
        assert_eq!(first, second);
    }

    // -- count_matching_capabilities ------------------------------------------

    #[test]
    fn matching_count_all_match() {
        let advertised = caps(&["linux", "docker", "gpu"]);
        let required = caps(&["linux", "gpu"]);
        assert_eq!(count_matching_capabilities(&advertised, &required), 2);
    }

    #[test]
    fn matching_count_none_match() {
        let advertised = caps(&["linux"]);
        let required = caps(&["windows", "arm"]);
        assert_eq!(count_matching_capabilities(&advertised, &required), 0);
    }

    #[test]
    fn matching_count_empty_required() {
        let advertised = caps(&["linux"]);
        assert_eq!(count_matching_capabilities(&advertised, &[]), 0);
    }

    // -- validate_party_id ----------------------------------------------------

    #[test]
    fn valid_delegate_id() {
        assert!(validate_party_id("delegate", "delegate-01.prod").is_ok());
    }

    #[test]
    fn empty_id_rejected() {
        assert!(validate_party_id("delegate", "").is_err());
    }

    #[test]
    fn id_with_spaces_rejected() {
        assert!(validate_party_id("account", "acct 01").is_err());
    }

    #[test]
    fn overlong_id_rejected() {
        let id = "a".repeat(MAX_ID_LEN + 1);
        assert!(validate_party_id("delegate", &id).is_err());
    }

    // -- validate_capabilities ------------------------------------------------

    #[test]
    fn valid_capabilities() {
        assert!(validate_capabilities(&caps(&["linux", "docker"])).is_ok());
    }

    #[test]
    fn empty_capability_rejected() {
        assert!(validate_capabilities(&caps(&["linux", ""])).is_err());
    }

    #[test]
    fn duplicate_capability_rejected() {
        assert!(validate_capabilities(&caps(&["linux", "linux"])).is_err());
    }

    #[test]
    fn too_many_capabilities_rejected() {
        let tags: Vec<String> = (0..MAX_CAPABILITIES + 1).map(|i| format!("cap-{i}")).collect();
        assert!(validate_capabilities(&tags).is_err());
    }
}
