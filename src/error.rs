pub type BingkaiResult<T> = Result<T, BingkaiError>;

#[derive(thiserror::Error, Debug)]
pub enum BingkaiError {
    #[error("validation error: {0}")]
    Validation(String),

    /// Overlay image or encoder binary could not be loaded/located.
    #[error("resource load error: {0}")]
    ResourceLoad(String),

    /// A job was requested while another job holds the pipeline.
    #[error("export pipeline is busy with another job")]
    Busy,

    /// The source media could not be decoded/played at all.
    #[error("playback error: {0}")]
    Playback(String),

    /// An encode step (external transcode or recording sink) failed.
    #[error("encode error: {0}")]
    Encode(String),

    /// Both export tiers failed for one job.
    #[error("export failed: external encoder: {external}; realtime capture: {realtime}")]
    ExportFailed {
        external: Box<BingkaiError>,
        realtime: Box<BingkaiError>,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BingkaiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn resource_load(msg: impl Into<String>) -> Self {
        Self::ResourceLoad(msg.into())
    }

    pub fn playback(msg: impl Into<String>) -> Self {
        Self::Playback(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    /// True when the fallback selector should try the next tier instead of
    /// surfacing this error to the caller.
    pub fn triggers_fallback(&self) -> bool {
        matches!(self, Self::ResourceLoad(_) | Self::Encode(_))
    }
}
