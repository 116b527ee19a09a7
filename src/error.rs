use thiserror::Error;

#[derive(Debug, Error)]
pub enum StudioError {
  #[error("{0}")]
  Validation(String),
  #[error("{0} already in progress")]
  Busy(&'static str),
  #[error("image generation failed: {0}")]
  Generation(String),
  #[error("prompt enhancement failed: {0}")]
  Enhancement(String),
  #[error("history persistence failed: {0}")]
  Persistence(String),
  #[error("{0} not found")]
  NotFound(String),
}

impl StudioError {
  pub fn code(&self) -> &'static str {
    match self {
      StudioError::Validation(_) => "validation_failed",
      StudioError::Busy(_) => "busy",
      StudioError::Generation(_) => "generation_failed",
      StudioError::Enhancement(_) => "enhancement_failed",
      StudioError::Persistence(_) => "persistence_failed",
      StudioError::NotFound(_) => "not_found",
    }
  }
}
