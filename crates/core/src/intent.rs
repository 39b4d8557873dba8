use serde::{Deserialize, Serialize};

/// Intent taxonomy for classified emails.
///
/// Business intents coexist with security-specific intents; the base risk of
/// each tag anchors the blended risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    MeetingRequest,
    TaskRequest,
    FollowUp,
    Invoice,
    Payment,
    Support,
    Sales,
    Newsletter,
    Spam,
    Personal,
    // Security-specific intents
    Phishing,
    Malware,
    SocialEngineering,
    BecFraud,
    Reconnaissance,
    Unknown,
}

impl Intent {
    /// Wire tag for this intent.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MeetingRequest => "meeting_request",
            Self::TaskRequest => "task_request",
            Self::FollowUp => "follow_up",
            Self::Invoice => "invoice",
            Self::Payment => "payment",
            Self::Support => "support",
            Self::Sales => "sales",
            Self::Newsletter => "newsletter",
            Self::Spam => "spam",
            Self::Personal => "personal",
            Self::Phishing => "phishing",
            Self::Malware => "malware",
            Self::SocialEngineering => "social_engineering",
            Self::BecFraud => "bec_fraud",
            Self::Reconnaissance => "reconnaissance",
            Self::Unknown => "unknown",
        }
    }

    /// All taxonomy tags, for prompt construction.
    #[must_use]
    pub fn all() -> &'static [Intent] {
        &[
            Self::MeetingRequest,
            Self::TaskRequest,
            Self::FollowUp,
            Self::Invoice,
            Self::Payment,
            Self::Support,
            Self::Sales,
            Self::Newsletter,
            Self::Spam,
            Self::Personal,
            Self::Phishing,
            Self::Malware,
            Self::SocialEngineering,
            Self::BecFraud,
            Self::Reconnaissance,
            Self::Unknown,
        ]
    }

    /// Base risk anchor for this intent, on the 0..=100 scale.
    #[must_use]
    pub fn base_risk(self) -> u8 {
        match self {
            Self::Phishing | Self::BecFraud => 95,
            Self::Malware => 98,
            Self::SocialEngineering => 90,
            Self::Reconnaissance => 75,
            Self::Spam => 60,
            Self::Invoice => 40,
            Self::Payment => 45,
            Self::Sales => 30,
            Self::MeetingRequest | Self::TaskRequest => 15,
            Self::FollowUp | Self::Personal => 10,
            Self::Support => 20,
            Self::Newsletter => 25,
            Self::Unknown => 50,
        }
    }
}

impl std::str::FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "meeting_request" => Ok(Self::MeetingRequest),
            "task_request" => Ok(Self::TaskRequest),
            "follow_up" => Ok(Self::FollowUp),
            "invoice" => Ok(Self::Invoice),
            "payment" => Ok(Self::Payment),
            "support" => Ok(Self::Support),
            "sales" => Ok(Self::Sales),
            "newsletter" => Ok(Self::Newsletter),
            "spam" => Ok(Self::Spam),
            "personal" => Ok(Self::Personal),
            "phishing" => Ok(Self::Phishing),
            "malware" => Ok(Self::Malware),
            "social_engineering" => Ok(Self::SocialEngineering),
            "bec_fraud" => Ok(Self::BecFraud),
            "reconnaissance" => Ok(Self::Reconnaissance),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown intent tag `{other}`")),
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the intent analyzer for one email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentAnalysis {
    /// Classified intent tag.
    pub intent: Intent,
    /// Classifier confidence in `[0, 1]`.
    pub confidence: f64,
    /// Short indicator tags supporting the classification.
    pub indicators: Vec<String>,
}

/// Blend the intent's base risk with the classifier confidence.
///
/// `round(base * c + 50 * (1 - c))`: full confidence pins the score to the
/// taxonomy anchor, zero confidence collapses to the neutral midpoint.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn blended_risk_score(intent: Intent, confidence: f64) -> u8 {
    let c = confidence.clamp(0.0, 1.0);
    let blended = f64::from(intent.base_risk()) * c + 50.0 * (1.0 - c);
    blended.round().min(100.0) as u8
}
