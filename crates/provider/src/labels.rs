use mailward_core::Verdict;

/// Brand label applied to messages the pipeline judged malicious.
pub const LABEL_MALICIOUS: &str = "Mailward/MALICIOUS";
/// Brand label applied to suspicious (or unknown, after promotion) messages.
pub const LABEL_CAUTIOUS: &str = "Mailward/CAUTIOUS";
/// Brand label applied to clean messages.
pub const LABEL_SAFE: &str = "Mailward/SAFE";

/// Provider system label for the spam folder; always exists.
pub const SPAM_LABEL_ID: &str = "SPAM";
/// Provider system label for the inbox; always exists.
pub const INBOX_LABEL_ID: &str = "INBOX";

/// Display definition of a brand label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelSpec {
    pub name: &'static str,
    pub background_color: &'static str,
    pub text_color: &'static str,
}

/// The three brand labels with their display colors.
#[must_use]
pub fn brand_labels() -> [LabelSpec; 3] {
    [
        LabelSpec {
            name: LABEL_MALICIOUS,
            background_color: "#cc3a21",
            text_color: "#ffffff",
        },
        LabelSpec {
            name: LABEL_CAUTIOUS,
            background_color: "#f2a600",
            text_color: "#ffffff",
        },
        LabelSpec {
            name: LABEL_SAFE,
            background_color: "#16a766",
            text_color: "#ffffff",
        },
    ]
}

/// Map a verdict to the brand label to apply.
///
/// `unknown` should have been promoted to `suspicious` before reaching the
/// provider; if one slips through it still lands on the cautious label.
#[must_use]
pub fn label_for_verdict(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::Malicious => LABEL_MALICIOUS,
        Verdict::Suspicious | Verdict::Unknown => LABEL_CAUTIOUS,
        Verdict::Clean => LABEL_SAFE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_label_mapping() {
        assert_eq!(label_for_verdict(Verdict::Malicious), LABEL_MALICIOUS);
        assert_eq!(label_for_verdict(Verdict::Suspicious), LABEL_CAUTIOUS);
        assert_eq!(label_for_verdict(Verdict::Unknown), LABEL_CAUTIOUS);
        assert_eq!(label_for_verdict(Verdict::Clean), LABEL_SAFE);
    }

    #[test]
    fn brand_labels_carry_colors() {
        let labels = brand_labels();
        assert_eq!(labels[0].background_color, "#cc3a21");
        assert_eq!(labels[1].background_color, "#f2a600");
        assert_eq!(labels[2].background_color, "#16a766");
    }
}
