use indicatif::{ProgressBar, ProgressStyle};
use scaosim::{Channel, SharedArray, Throttle, ValidSubapertures};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "reconstructor",
    about = "Wavefront reconstruction from the simulator slopes"
)]
struct Opt {
    /// Pupil width [pixel]
    #[structopt(long, default_value = "64")]
    pupil_width: usize,
    /// Shared memory channels suffix
    #[structopt(long, default_value = "-scaosim")]
    suffix: String,
    /// Loop rate [Hz]
    #[structopt(long, default_value = "100")]
    fps: f64,
    /// Number of iterations, runs until interrupted if not set
    #[structopt(short, long)]
    iterations: Option<usize>,
}

// population standard deviation
fn std(data: &[f32]) -> f64 {
    let n = data.len().max(1) as f64;
    let mean = data.iter().map(|&x| x as f64).sum::<f64>() / n;
    (data
        .iter()
        .map(|&x| (x as f64 - mean).powi(2))
        .sum::<f64>()
        / n)
        .sqrt()
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let slopes = SharedArray::<f32>::open(&Channel::Slopes.name(&opt.suffix))?;
    let valid = ValidSubapertures::from_mask(
        &SharedArray::<u8>::open(&Channel::ValidSubaps.name(&opt.suffix))?.read(),
    );
    // (bx,by) of the valid subapertures, in the order of the x and y slope halves
    let xy_valid = valid.coordinates()?;
    anyhow::ensure!(
        slopes.len() == 2 * xy_valid.len(),
        "{} slopes for {} valid subapertures",
        slopes.len(),
        xy_valid.len()
    );
    log::info!(
        "{} valid subapertures, first: {:?}, last: {:?}",
        xy_valid.len(),
        xy_valid.first(),
        xy_valid.last()
    );

    let width = opt.pupil_width;
    let mut recon = SharedArray::<f32>::create(&Channel::Recon.name(&opt.suffix), &[width, width])?;
    // no reconstruction matrix yet, the reconstructed phase is flat
    let phase = vec![0f32; width * width];

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::with_template(
        "{spinner} [{elapsed_precise}] {pos} ({per_sec}) {msg}",
    )?);
    let mut throttle = Throttle::new(opt.fps);
    let mut i = 0usize;
    while opt.iterations.map_or(true, |n| i < n) {
        let s = slopes.read();
        recon.write(&phase)?;
        pb.set_message(format!("slopes std: {:.4} arcsec", std(&s)));
        pb.inc(1);
        throttle.wait();
        i += 1;
    }
    pb.finish();

    Ok(())
}
