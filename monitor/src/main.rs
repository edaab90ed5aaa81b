use indicatif::{ProgressBar, ProgressStyle};
use scaosim::{Channel, Pupil, SharedArray, Throttle};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "monitor", about = "Residual wavefront error monitor")]
struct Opt {
    /// Pupil width [pixel]
    #[structopt(long, default_value = "64")]
    pupil_width: usize,
    /// Shared memory channels suffix
    #[structopt(long, default_value = "-scaosim")]
    suffix: String,
    /// Refresh rate [Hz]
    #[structopt(long, default_value = "30")]
    fps: f64,
    /// Number of refreshes, runs until interrupted if not set
    #[structopt(short, long)]
    iterations: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let width = opt.pupil_width;
    let pupil = Pupil::circle(width as f64 / 2., width);
    // row-major indices of the pupil active pixels
    let active: Vec<usize> = pupil.active().map(|(row, col)| row * width + col).collect();

    let turb = SharedArray::<f32>::open(&Channel::Turb.name(&opt.suffix))?;
    let recon = SharedArray::<f32>::open(&Channel::Recon.name(&opt.suffix))?;
    for channel in [&turb, &recon] {
        anyhow::ensure!(
            channel.shape() == [width, width],
            "{:?}: expected a {}x{} phase map",
            channel.path(),
            width,
            width
        );
    }

    log::info!(
        "monitoring {:?} - {:?} over {} pupil pixels",
        turb.path(),
        recon.path(),
        active.len()
    );

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::with_template(
        "{spinner} [{elapsed_precise}] {pos} ({per_sec}) {msg}",
    )?);
    let mut throttle = Throttle::new(opt.fps);
    let mut i = 0usize;
    while opt.iterations.map_or(true, |n| i < n) {
        let (phi_atmos, phi_recon) = (turb.read(), recon.read());
        let residual: Vec<f64> = active
            .iter()
            .map(|&p| (phi_atmos[p] - phi_recon[p]) as f64)
            .collect();
        let n = residual.len().max(1) as f64;
        let mean = residual.iter().sum::<f64>() / n;
        let std = (residual.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n).sqrt();
        throttle.wait();
        pb.set_message(format!("rms wf: {:.4} um", std));
        pb.inc(1);
        i += 1;
    }
    pb.finish();

    Ok(())
}
