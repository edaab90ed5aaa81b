use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use nalgebra::DMatrix;
use scaosim::{
    shm::shm_dir, slopes::FLUX_FRACTION, Channel, ClassicCog, PhaseScreen, Pupil, SharedArray,
    Shwfs, Truncation, ValidSubapertures,
};
use strum::IntoEnumIterator;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "scaosim",
    about = "Single conjugate adaptive optics hardware simulator"
)]
struct Opt {
    /// Pupil width [pixel]
    #[structopt(long, default_value = "64")]
    pupil_width: usize,
    /// Number of subapertures across the pupil
    #[structopt(long, default_value = "32")]
    nsubx: usize,
    /// Subaperture field of view [pixel]
    #[structopt(long, default_value = "8")]
    fovx: usize,
    /// Sensing wavelength [micron]
    #[structopt(long, default_value = "0.589")]
    wavelength: f64,
    /// Telescope diameter [m]
    #[structopt(long, default_value = "8")]
    diameter: f64,
    /// Fried parameter at 0.5 micron [m]
    #[structopt(long, default_value = "0.2")]
    r0: f64,
    /// Outer scale [m]
    #[structopt(long = "outer-scale", default_value = "25")]
    l0: f64,
    /// Lamination factor
    #[structopt(long, default_value = "0.999")]
    laminar: f64,
    /// Wind speed along x [m/s]
    #[structopt(long, default_value = "10")]
    wind_x: f64,
    /// Wind speed along y [m/s]
    #[structopt(long, default_value = "20")]
    wind_y: f64,
    /// Integration time [s]
    #[structopt(long, default_value = "0.002")]
    ittime: f64,
    /// Eigen value threshold [micron²]
    #[structopt(long, default_value = "1e-3")]
    threshold: f64,
    /// Number of phase covariance modes, 0 to truncate with the threshold
    #[structopt(long, default_value = "500")]
    xx_max: usize,
    /// Number of innovation covariance modes, 0 to truncate with the threshold
    #[structopt(long, default_value = "0")]
    vv_max: usize,
    /// Random generator seed
    #[structopt(long, default_value = "1234")]
    seed: u64,
    /// Shared memory channels suffix
    #[structopt(long, default_value = "-scaosim")]
    suffix: String,
    /// Number of frames, runs until interrupted if not set
    #[structopt(short, long)]
    frames: Option<usize>,
    /// Removes the shared memory channels before starting
    #[structopt(long)]
    clean: bool,
}

fn truncation(n_mode: usize, threshold: f64) -> Truncation {
    match n_mode {
        0 => Truncation::Threshold(threshold),
        n => Truncation::Modes(n),
    }
}

// row-major f32 copy of a map
fn row_major(map: &DMatrix<f64>) -> Vec<f32> {
    map.transpose().iter().map(|&x| x as f32).collect()
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();
    let name = |channel: Channel| channel.name(&opt.suffix);

    if opt.clean {
        for channel in Channel::iter() {
            if SharedArray::<u8>::remove_in(shm_dir(), &name(channel))? {
                log::info!("removed {}", name(channel));
            }
        }
    }

    let width = opt.pupil_width;
    let pupil = Pupil::circle(width as f64 / 2., width);
    let mut screen = PhaseScreen::builder(pupil.clone())
        .r0(opt.r0)
        .outer_scale(opt.l0)
        .diameter(opt.diameter)
        .laminar(opt.laminar)
        .wind([opt.wind_x, opt.wind_y])
        .ittime(opt.ittime)
        .truncation_xx(truncation(opt.xx_max, opt.threshold))
        .truncation_vv(truncation(opt.vv_max, opt.threshold))
        .seed(opt.seed)
        .build()
        .context("failed to build the phase screen")?;
    let wfs = Shwfs::builder(pupil)
        .nsubx(opt.nsubx)
        .fovx(opt.fovx)
        .wavelength(opt.wavelength)
        .diameter(opt.diameter)
        .build()
        .context("failed to build the wavefront sensor")?;
    let cog = ClassicCog::calibrate(opt.fovx);

    let frame = wfs.measure(&screen.phase())?;
    let valid = ValidSubapertures::from_flux(&frame.flux(), FLUX_FRACTION);
    anyhow::ensure!(valid.count() > 0, "no valid subaperture");
    log::info!(
        "{} valid subapertures, pixel scale: {:.4}arcsec",
        valid.count(),
        wfs.pixel_scale()
    );

    let mut shm_phase = SharedArray::<f32>::create(&name(Channel::Turb), &[width, width])?;
    let mut shm_slopes =
        SharedArray::<f32>::create(&name(Channel::Slopes), &[2 * valid.count()])?;
    let mut shm_valid =
        SharedArray::<u8>::create(&name(Channel::ValidSubaps), &[opt.nsubx, opt.nsubx])?;
    shm_valid.write(&valid.mask())?;
    let n_px = opt.nsubx * opt.fovx;
    let mut shm_wfsimg = SharedArray::<f32>::create(&name(Channel::WfsImg), &[n_px, n_px])?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::with_template(
        "{spinner} [{elapsed_precise}] {pos} frames ({per_sec}) {msg}",
    )?);
    let mut n_frame = 0usize;
    while opt.frames.map_or(true, |n| n_frame < n) {
        screen.step();
        let phi = screen.phase();
        let frame = wfs.measure(&phi)?;
        let slopes = valid.pack(&cog.cog(&frame.subapertures)?, wfs.pixel_scale())?;
        shm_phase.write(&row_major(&phi))?;
        shm_slopes.write(&slopes)?;
        shm_wfsimg.write(&row_major(&frame.image))?;
        pb.set_message(format!("rms wf: {:.4} um", screen.rms()));
        pb.inc(1);
        n_frame += 1;
    }
    pb.finish();

    Ok(())
}
