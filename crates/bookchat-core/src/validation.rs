//! Structural checks. A record that fails these never enters the log,
//! whatever the verification mode.

use crate::error::ValidationError;
use crate::record::{RecordDraft, RecordKind, UsernameChange, MAX_CONTENT_LEN};

/// Validate a draft's structure.
///
/// This performs:
/// - Content size limit
/// - Non-empty content for messages
/// - Well-formed payload for username changes, authored by the old name
///
/// Signatures, bindings and log context (parent, tail time) are checked
/// elsewhere.
pub fn validate_draft(draft: &RecordDraft) -> Result<(), ValidationError> {
    // 1. Size limit
    if draft.content.len() > MAX_CONTENT_LEN {
        return Err(ValidationError::ContentTooLarge {
            len: draft.content.len(),
            max: MAX_CONTENT_LEN,
        });
    }

    match draft.header.kind {
        // 2. Messages need a body
        RecordKind::Message => {
            if draft.content.is_empty() {
                return Err(ValidationError::MalformedRecord(
                    "message content is empty".into(),
                ));
            }
        }
        // 3. Username changes need a payload naming the author
        RecordKind::UsernameChange => {
            let change = UsernameChange::from_content(&draft.content)
                .map_err(|e| ValidationError::MalformedRecord(e.to_string()))?;
            if change.old_username != draft.header.author {
                return Err(ValidationError::MalformedRecord(format!(
                    "username_change by {} names {} as old_username",
                    draft.header.author, change.old_username
                )));
            }
            if change.old_username == change.new_username {
                return Err(ValidationError::MalformedRecord(
                    "username_change to the same name".into(),
                ));
            }
        }
        RecordKind::System | RecordKind::Error => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Username;

    fn name(s: &str) -> Username {
        Username::parse(s).unwrap()
    }

    #[test]
    fn test_valid_drafts() {
        let msg = RecordDraft::new(name("alice"), RecordKind::Message).content("hi");
        assert!(validate_draft(&msg).is_ok());

        let change = RecordDraft::username_change(&UsernameChange::new(name("alice"), name("alicia")));
        assert!(validate_draft(&change).is_ok());

        let system = RecordDraft::new(name("system"), RecordKind::System);
        assert!(validate_draft(&system).is_ok());
    }

    #[test]
    fn test_empty_message_rejected() {
        let msg = RecordDraft::new(name("alice"), RecordKind::Message);
        assert!(matches!(
            validate_draft(&msg),
            Err(ValidationError::MalformedRecord(_))
        ));
    }

    #[test]
    fn test_oversized_content_rejected() {
        let msg = RecordDraft::new(name("alice"), RecordKind::Message)
            .content(vec![b'x'; MAX_CONTENT_LEN + 1]);
        assert!(matches!(
            validate_draft(&msg),
            Err(ValidationError::ContentTooLarge { .. })
        ));
    }

    #[test]
    fn test_username_change_structure() {
        let garbage = RecordDraft::new(name("alice"), RecordKind::UsernameChange).content("nope");
        assert!(validate_draft(&garbage).is_err());

        let foreign = RecordDraft::new(name("bob_b"), RecordKind::UsernameChange)
            .content(UsernameChange::new(name("alice"), name("alicia")).to_content());
        assert!(validate_draft(&foreign).is_err());

        let same = RecordDraft::username_change(&UsernameChange::new(name("alice"), name("alice")));
        assert!(validate_draft(&same).is_err());
    }
}
