use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),

    #[error("Authentication error: {0}")]
    Auth(#[from] core_auth::AuthError),

    #[error("Link error: {0}")]
    Link(#[from] core_link::LinkError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
