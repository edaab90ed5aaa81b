//! Single conjugate adaptive optics simulator
//!
//! A stationary autoregressive model of the atmospheric turbulence ([PhaseScreen]) feeds a
//! Shack-Hartmann wavefront sensor ([Shwfs]); the sensor images are reduced into
//! slopes ([ClassicCog], [ValidSubapertures]) and the phase, images and slopes are
//! published to shared memory channels ([SharedArray], [Channel]) for downstream
//! processes.
//!
//! ```no_run
//! use scaosim::{ClassicCog, PhaseScreen, Pupil, Shwfs, ValidSubapertures};
//!
//! # fn main() -> scaosim::Result<()> {
//! let pupil = Pupil::circle(32., 64);
//! let mut screen = PhaseScreen::builder(pupil.clone()).r0(0.2).build()?;
//! let wfs = Shwfs::builder(pupil).nsubx(32).fovx(8).build()?;
//! let cog = ClassicCog::calibrate(8);
//!
//! let frame = wfs.measure(&screen.phase())?;
//! let valid = ValidSubapertures::from_flux(&frame.flux(), 0.9);
//! screen.step();
//! let frame = wfs.measure(&screen.phase())?;
//! let slopes = valid.pack(&cog.cog(&frame.subapertures)?, wfs.pixel_scale())?;
//! # Ok(())
//! # }
//! ```

pub mod centroid;
pub mod covariance;
pub mod error;
pub mod factorization;
pub mod pacing;
pub mod phase_screen;
pub mod pupil;
pub mod shm;
pub mod shwfs;
pub mod slopes;
pub mod state_matrix;

pub use centroid::ClassicCog;
pub use covariance::{covariance_matrix, CovarianceKernel, VonKarman};
pub use error::{Error, Result};
pub use factorization::{factorize, Factorization, Truncation};
pub use pacing::Throttle;
pub use phase_screen::{PhaseScreen, PhaseScreenBuilder};
pub use pupil::{PositionSet, Pupil};
pub use shm::{Channel, Element, SharedArray};
pub use shwfs::{Shwfs, ShwfsBuilder, WfsFrame};
pub use slopes::ValidSubapertures;
pub use state_matrix::{StateMatrix, Strategy};
