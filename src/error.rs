use crate::{
    centroid::CentroidError, factorization::FactorizationError, phase_screen::PhaseScreenError,
    shm::ShmError, shwfs::ShwfsError, slopes::SlopesError,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Error in the `factorization` module")]
    Factorization(#[from] FactorizationError),
    #[error("Error in the `phase_screen` module")]
    PhaseScreen(#[from] PhaseScreenError),
    #[error("Error in the `shwfs` module")]
    Shwfs(#[from] ShwfsError),
    #[error("Error in the `centroid` module")]
    Centroid(#[from] CentroidError),
    #[error("Error in the `slopes` module")]
    Slopes(#[from] SlopesError),
    #[error("Error in the `shm` module")]
    Shm(#[from] ShmError),
}
pub type Result<T> = std::result::Result<T, Error>;
