use uuid::Uuid;

use crate::normalization::normalize_content;

/// Namespace for every id minted by the pipeline. Changing it changes every id.
pub const ID_NAMESPACE: Uuid = Uuid::from_u128(0x12345678_1234_5678_1234_567812345678);

/// Stable element id: UUIDv5 of the normalized content. Equal normalized
/// content from different positions yields the same id.
pub fn content_id(raw: &str) -> String {
    id_for_normalized(&normalize_content(raw))
}

pub fn id_for_normalized(normalized: &str) -> String {
    Uuid::new_v5(&ID_NAMESPACE, normalized.as_bytes()).to_string()
}

/// Id of the fix candidate for one (element, rule) pair.
pub fn candidate_id(element_id: &str, rule_id: &str) -> String {
    let key = format!("{element_id}:{rule_id}");
    Uuid::new_v5(&ID_NAMESPACE, key.as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_reference_uuid_v5() {
        assert_eq!(content_id("click me"), "b83bc0e1-f1bf-515c-89a7-4b49ea2cd3e4");
        assert_eq!(content_id(""), "d687edb1-27fb-5c25-bf30-1b2242e53884");
    }

    #[test]
    fn normalization_differences_collapse() {
        assert_eq!(content_id("Click   me"), content_id("click me"));
        assert_ne!(content_id("click me"), content_id("click you"));
    }

    #[test]
    fn candidate_ids_depend_on_rule() {
        let element = content_id("<img src=\"a.png\">");
        assert_ne!(candidate_id(&element, "1.1.1"), candidate_id(&element, "4.1.2"));
        assert_eq!(candidate_id(&element, "1.1.1"), candidate_id(&element, "1.1.1"));
    }
}
