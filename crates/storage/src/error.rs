use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    #[snafu(display("storage conflict for '{entity}' with id '{id}': already present"))]
    DuplicateId {
        stage: &'static str,
        entity: &'static str,
        id: String,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;
