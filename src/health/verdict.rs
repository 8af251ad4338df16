use hyper::StatusCode;

pub const FORCED_UP_MESSAGE: &str = "Cluster node OK by manual override";
pub const FORCED_DOWN_MESSAGE: &str = "Cluster node unavailable by manual override";
pub const DONOR_MESSAGE: &str = "Cluster node in Donor mode";
pub const UNAVAILABLE_MESSAGE: &str = "Cluster node is unavailable";
pub const READ_ONLY_MESSAGE: &str = "Cluster node is read only";
pub const READ_ONLY_UNKNOWN_MESSAGE: &str = "Unable to determine read only setting";
pub const HEALTHY_MESSAGE: &str = "Cluster node OK";

/// Outcome of one health evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Force-up sentinel present
    ForcedUp,
    /// Force-fail sentinel present
    ForcedDown,
    /// The check itself could not complete
    Error(String),
    /// Donor/desynced and donors are allowed
    Donor,
    /// Not synced
    Unavailable,
    /// Synced but read_only=ON
    ReadOnly,
    Healthy,
}

impl Verdict {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Verdict::ForcedUp | Verdict::Donor | Verdict::Healthy => StatusCode::OK,
            Verdict::ForcedDown => StatusCode::NOT_FOUND,
            Verdict::Error(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Verdict::Unavailable | Verdict::ReadOnly => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Verdict::ForcedUp => FORCED_UP_MESSAGE,
            Verdict::ForcedDown => FORCED_DOWN_MESSAGE,
            Verdict::Error(message) => message,
            Verdict::Donor => DONOR_MESSAGE,
            Verdict::Unavailable => UNAVAILABLE_MESSAGE,
            Verdict::ReadOnly => READ_ONLY_MESSAGE,
            Verdict::Healthy => HEALTHY_MESSAGE,
        }
    }

    /// Response body: the message with a trailing newline
    pub fn body(&self) -> String {
        format!("{}\n", self.message())
    }

    /// Whether the load balancer should route to this node
    pub fn is_available(&self) -> bool {
        self.status_code() == StatusCode::OK
    }

    /// Short label for logs
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::ForcedUp => "forced_up",
            Verdict::ForcedDown => "forced_down",
            Verdict::Error(_) => "error",
            Verdict::Donor => "donor",
            Verdict::Unavailable => "unavailable",
            Verdict::ReadOnly => "read_only",
            Verdict::Healthy => "healthy",
        }
    }
}
