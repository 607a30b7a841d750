use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;
use chrono_tz::Tz;
use clap::Parser;
use rtsp_sim::{
    assets,
    config::{self, Settings},
    media::{qr::RqrrDecoder, source::FfmpegSource},
    pipeline::{Supervisor, encoder::FfmpegEncoder},
};

#[derive(Debug, Parser)]
#[command(name = "rtsp-sim", version, about = "Simulated self-checkout camera")]
struct CliArgs {
    /// Camera name under `cameras:` in the configuration file
    #[arg(long)]
    cam: String,

    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Stop after this many frames
    #[arg(long)]
    frames: Option<u64>,
}

fn init_logging(timezone: &str) {
    let tz = timezone.parse::<Tz>().ok();
    let shown = tz.unwrap_or(Tz::UTC);
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(move |buf, record| {
            writeln!(
                buf,
                "{} {:<5} {}",
                Utc::now().with_timezone(&shown).format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        })
        .init();
    if tz.is_none() {
        log::warn!("unknown timezone '{}', falling back to UTC", timezone);
    }
}

fn fail(context: &str, e: impl std::fmt::Display) -> ! {
    log::error!("{}: {:#}", context, e);
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    let mut settings = Settings::load(&args.config, &args.cam).unwrap_or_else(|e| {
        eprintln!("Error loading configuration: {:#}", e);
        std::process::exit(1);
    });
    if args.frames.is_some() {
        settings.frame_limit = args.frames;
    }
    init_logging(&settings.timezone);
    log::info!(
        "[Main] camera {} -> rtsp://0.0.0.0:{}{}, api {}",
        settings.camera,
        settings.rtsp_port,
        settings.rtsp_path,
        settings.api_url
    );

    if let Err(e) = ffmpeg_media::init() {
        fail("ffmpeg init", e);
    }
    match assets::ensure_video(
        &settings.video,
        settings.md5.as_deref(),
        settings.download_url.as_deref(),
    )
    .await
    {
        Ok(status) => log::info!("[Main] video {}: {:?}", settings.video.display(), status),
        Err(e) => fail("video asset", e),
    }
    let encoder = FfmpegEncoder::new(&settings).unwrap_or_else(|e| fail("stream encoder", e));

    let supervisor = Supervisor::new(settings.clone());
    let stop = supervisor.stop_token();
    let video = settings.video.clone();
    let mut pipeline = tokio::spawn(supervisor.run(
        move || FfmpegSource::open(video),
        RqrrDecoder::new(),
        encoder,
    ));

    let result = loop {
        tokio::select! {
            result = &mut pipeline => break result,
            _ = shutdown_signal(), if !stop.is_cancelled() => {
                log::info!("[Main] shutdown requested");
                stop.cancel();
            },
        }
    };

    match result {
        Ok(Ok(_)) => std::process::exit(0),
        Ok(Err(_)) => std::process::exit(1),
        Err(e) => fail("pipeline task", e),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
