use crate::email::{AttachmentMetadata, StructuredEmail};

/// Attachment extensions that always warrant dynamic analysis.
const RISKY_EXTENSIONS: &[&str] = &[
    ".exe", ".scr", ".vbs", ".js", ".bat", ".iso", ".dll", ".ps1",
];

/// Whether an attachment is worth detonating: a risky executable extension
/// or a zip archive.
#[must_use]
pub fn is_risky_attachment(att: &AttachmentMetadata) -> bool {
    att.extension()
        .is_some_and(|ext| RISKY_EXTENSIONS.contains(&ext.as_str()))
        || att.mime_type == "application/zip"
}

/// Outcome of the static risk gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskAssessment {
    /// Whether the sandbox track must run for this email.
    pub requires_sandbox: bool,
    /// Human-readable summary of the triggered indicators.
    pub reason: String,
    /// Static risk score in `0..=100`.
    pub static_score: u8,
}

/// Evaluate static indicators to decide whether sandboxing is needed.
///
/// Pure and deterministic: the same email always yields the same assessment.
/// Scoring: risky attachment extension +70, zip archive +30, any URL +5,
/// more than three URLs +20. The score is clamped to 100, and anything above
/// 50 forces sandboxing as a safety net.
#[must_use]
pub fn evaluate_static_risk(email: &StructuredEmail) -> RiskAssessment {
    let mut score: u32 = 0;
    let mut reasons: Vec<String> = Vec::new();
    let mut requires_sandbox = false;

    for att in &email.attachments {
        if let Some(ext) = att.extension()
            && RISKY_EXTENSIONS.contains(&ext.as_str())
        {
            score += 70;
            reasons.push(format!("Risky extension {ext}"));
            requires_sandbox = true;
        } else if att.mime_type == "application/zip" {
            score += 30;
            reasons.push("Archive attachment".to_owned());
            requires_sandbox = true;
        }
    }

    if !email.extracted_urls.is_empty() {
        score += 5;
        if email.extracted_urls.len() > 3 {
            score += 20;
            reasons.push("Many URLs".to_owned());
            requires_sandbox = true;
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    let score = score.min(100) as u8;
    if score > 50 {
        requires_sandbox = true;
    }

    let reason = if reasons.is_empty() {
        "Low static risk".to_owned()
    } else {
        reasons.join("; ")
    };

    RiskAssessment {
        requires_sandbox,
        reason,
        static_score: score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::{AttachmentMetadata, AuthStatus};

    fn email(urls: Vec<&str>, attachments: Vec<AttachmentMetadata>) -> StructuredEmail {
        StructuredEmail {
            message_id: "m1".into(),
            sender: "sender@example.com".into(),
            recipient: "rcpt@example.com".into(),
            subject: "subject".into(),
            body_preview: "preview".into(),
            body_text: None,
            body_html: None,
            received_at: None,
            auth_status: AuthStatus::default(),
            sender_ip: None,
            extracted_urls: urls.into_iter().map(String::from).collect(),
            attachments,
        }
    }

    fn attachment(filename: &str, mime_type: &str) -> AttachmentMetadata {
        AttachmentMetadata {
            filename: filename.into(),
            mime_type: mime_type.into(),
            size: 2048,
            attachment_id: None,
        }
    }

    #[test]
    fn clean_email_stays_below_gate() {
        let assessment = evaluate_static_risk(&email(vec![], vec![]));
        assert!(!assessment.requires_sandbox);
        assert_eq!(assessment.static_score, 0);
        assert_eq!(assessment.reason, "Low static risk");
    }

    #[test]
    fn single_url_scores_five_without_sandbox() {
        let assessment = evaluate_static_risk(&email(vec!["https://example.com"], vec![]));
        assert!(!assessment.requires_sandbox);
        assert_eq!(assessment.static_score, 5);
    }

    #[test]
    fn many_urls_trigger_sandbox() {
        let assessment = evaluate_static_risk(&email(
            vec!["https://a.com", "https://b.com", "https://c.com", "https://d.com"],
            vec![],
        ));
        assert!(assessment.requires_sandbox);
        assert_eq!(assessment.static_score, 25);
        assert!(assessment.reason.contains("Many URLs"));
    }

    #[test]
    fn risky_extension_forces_sandbox() {
        let assessment = evaluate_static_risk(&email(
            vec![],
            vec![attachment("invoice.exe", "application/octet-stream")],
        ));
        assert!(assessment.requires_sandbox);
        assert_eq!(assessment.static_score, 70);
        assert!(assessment.reason.contains("Risky extension .exe"));
    }

    #[test]
    fn zip_archive_scores_thirty() {
        let assessment = evaluate_static_risk(&email(
            vec![],
            vec![attachment("bundle.zip", "application/zip")],
        ));
        assert!(assessment.requires_sandbox);
        assert_eq!(assessment.static_score, 30);
        assert_eq!(assessment.reason, "Archive attachment");
    }

    #[test]
    fn risky_extension_wins_over_zip_mime() {
        // A .js file delivered with a zip MIME type counts once, as a risky
        // extension.
        let assessment =
            evaluate_static_risk(&email(vec![], vec![attachment("dropper.js", "application/zip")]));
        assert_eq!(assessment.static_score, 70);
        assert_eq!(assessment.reason, "Risky extension .js");
    }

    #[test]
    fn score_clamps_at_one_hundred() {
        let assessment = evaluate_static_risk(&email(
            vec![],
            vec![
                attachment("a.exe", "application/octet-stream"),
                attachment("b.scr", "application/octet-stream"),
            ],
        ));
        assert_eq!(assessment.static_score, 100);
        assert!(assessment.requires_sandbox);
    }

    #[test]
    fn risky_attachment_predicate() {
        assert!(is_risky_attachment(&attachment("a.exe", "application/octet-stream")));
        assert!(is_risky_attachment(&attachment("a.zip", "application/zip")));
        assert!(!is_risky_attachment(&attachment("a.pdf", "application/pdf")));
    }

    #[test]
    fn pdf_attachment_is_not_risky() {
        let assessment =
            evaluate_static_risk(&email(vec![], vec![attachment("report.pdf", "application/pdf")]));
        assert!(!assessment.requires_sandbox);
        assert_eq!(assessment.static_score, 0);
    }
}
