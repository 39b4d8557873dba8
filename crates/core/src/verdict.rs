use serde::{Deserialize, Serialize};

/// Analyzer-level verdict taxonomy.
///
/// `safe` is accepted as an alias of `clean` on parse: the URL-reputation
/// analyzer speaks {malicious, safe, unknown} while the sandbox speaks
/// {malicious, suspicious, clean, unknown}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Malicious,
    Suspicious,
    Clean,
    Unknown,
}

impl Verdict {
    /// Wire tag for this verdict.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Malicious => "malicious",
            Self::Suspicious => "suspicious",
            Self::Clean => "clean",
            Self::Unknown => "unknown",
        }
    }

    /// Promote for action purposes: an `unknown` analyzer verdict is treated
    /// as `suspicious` so the pipeline fails conservative.
    #[must_use]
    pub fn promoted(self) -> Self {
        match self {
            Self::Unknown => Self::Suspicious,
            other => other,
        }
    }
}

impl std::str::FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "malicious" => Ok(Self::Malicious),
            "suspicious" => Ok(Self::Suspicious),
            "clean" | "safe" => Ok(Self::Clean),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown verdict `{other}`")),
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized output of a dynamic analyzer run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxReport {
    /// Normalized verdict.
    pub verdict: Verdict,
    /// Threat score in `0..=100`.
    pub score: u8,
    /// Provider-specific supporting detail (family, reason, raw tags).
    pub details: serde_json::Value,
    /// Which analyzer produced the report.
    pub provider: String,
    /// True when the analyzer gave up waiting rather than concluding.
    #[serde(default)]
    pub timed_out: bool,
}

impl SandboxReport {
    /// Report for an email with nothing the analyzer can scan.
    #[must_use]
    pub fn no_scannable_content(provider: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Clean,
            score: 0,
            details: serde_json::json!({ "reason": "No scannable content" }),
            provider: provider.into(),
            timed_out: false,
        }
    }

    /// Conservative report for an analyzer that errored or timed out.
    #[must_use]
    pub fn inconclusive(provider: impl Into<String>, reason: impl Into<String>, timed_out: bool) -> Self {
        Self {
            verdict: Verdict::Unknown,
            score: 50,
            details: serde_json::json!({ "reason": reason.into() }),
            provider: provider.into(),
            timed_out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_safe_alias() {
        assert_eq!("safe".parse::<Verdict>().unwrap(), Verdict::Clean);
        assert_eq!("SAFE".parse::<Verdict>().unwrap(), Verdict::Clean);
        assert_eq!("clean".parse::<Verdict>().unwrap(), Verdict::Clean);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("benign".parse::<Verdict>().is_err());
    }

    #[test]
    fn promotion_only_touches_unknown() {
        assert_eq!(Verdict::Unknown.promoted(), Verdict::Suspicious);
        assert_eq!(Verdict::Malicious.promoted(), Verdict::Malicious);
        assert_eq!(Verdict::Clean.promoted(), Verdict::Clean);
        assert_eq!(Verdict::Suspicious.promoted(), Verdict::Suspicious);
    }

    #[test]
    fn inconclusive_report_is_unknown_fifty() {
        let report = SandboxReport::inconclusive("sandbox", "poll deadline exceeded", true);
        assert_eq!(report.verdict, Verdict::Unknown);
        assert_eq!(report.score, 50);
        assert!(report.timed_out);
    }

    #[test]
    fn report_serde_roundtrip() {
        let report = SandboxReport {
            verdict: Verdict::Malicious,
            score: 90,
            details: serde_json::json!({ "family": "Trojan.Agent" }),
            provider: "sandbox".into(),
            timed_out: false,
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"verdict\":\"malicious\""));
        let back: SandboxReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }
}
