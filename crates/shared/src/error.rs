#[derive(thiserror::Error, Debug)]
pub enum SharedError {
    #[error("Invalid workflow key: {value}")]
    InvalidWorkflowKey { value: String },
}
