use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use motif_worker::contract::{self, ContractOptions, Violation};
use motif_worker::layout::{ProjectLayout, Stage};
use motif_worker::media::SyntheticBackend;
use motif_worker::model::LinearPoseModel;
use motif_worker::observability;
use motif_worker::pipeline::{
    ClipOptions, CommunityOptions, GenerativeMode, GenerativeOptions, GifOptions, LabelKind,
    Overwrite, Pipeline, VisualizationOptions,
};
use motif_worker::project::init_new_project;
use motif_worker::store::read_f32_matrix;
use motif_worker::{ConfigStore, ProjectConfig, StageReport};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Project config file
    #[arg(long, env = "MOTIF_WORKER_CONFIG", default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Use a procedural video of this many frames instead of ffmpeg
    #[arg(long, global = true)]
    synthetic_frames: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a project directory with a default config
    Init {
        name: String,
        #[arg(long = "video", required = true)]
        videos: Vec<String>,
        #[arg(long, default_value = ".")]
        working_dir: PathBuf,
    },
    /// Rewrite the config with every known key present
    UpdateConfig,
    /// Fit the built-in linear pose model on the cleaned pose data
    TrainLinear,
    PoseSegmentation {
        /// Overwrite existing results without asking
        #[arg(long)]
        yes: bool,
    },
    Community {
        #[arg(long)]
        cut_tree: usize,
        #[arg(long)]
        cohort: bool,
        #[arg(long)]
        show_umap: bool,
        #[arg(long)]
        save_umap_figure: bool,
        #[arg(long)]
        save_logs: bool,
    },
    MotifVideos {
        #[arg(long)]
        save_logs: bool,
    },
    CommunityVideos {
        #[arg(long)]
        cohort: bool,
        #[arg(long)]
        save_logs: bool,
    },
    Visualization {
        #[arg(long, value_enum, default_value_t = LabelArg::None)]
        label: LabelArg,
        #[arg(long)]
        video: Option<String>,
        /// Render the figure to this PNG
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        save_logs: bool,
    },
    GenerativeModel {
        #[arg(long, value_enum, default_value_t = ModeArg::Sampling)]
        mode: ModeArg,
        #[arg(long)]
        video: Option<String>,
        #[arg(long, default_value = "9")]
        samples: usize,
        #[arg(long)]
        seed: Option<u64>,
        /// Render the figure to this PNG
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        save_logs: bool,
    },
    Gif {
        #[arg(long, num_args = 2, value_names = ["A", "B"], default_values_t = [0, 5])]
        pose_ref_index: Vec<usize>,
        #[arg(long)]
        keep_background: bool,
        #[arg(long)]
        background_frames: Option<usize>,
        #[arg(long)]
        start: Option<usize>,
        #[arg(long, default_value = "500")]
        length: usize,
        #[arg(long, default_value = "30")]
        max_lag: usize,
        #[arg(long, value_enum, default_value_t = LabelArg::Community)]
        label: LabelArg,
        #[arg(long)]
        file_format: Option<String>,
        /// Crop as WIDTHxHEIGHT; `none` keeps the full frame
        #[arg(long, default_value = "300x300")]
        crop_size: String,
        #[arg(long)]
        video: Option<String>,
        #[arg(long)]
        assemble_gif: bool,
        #[arg(long)]
        save_logs: bool,
    },
    /// Check the files a completed stage guarantees
    Verify {
        #[arg(long, value_enum)]
        stage: Vec<StageArg>,
        #[arg(long)]
        cohort: bool,
        #[arg(long)]
        umap: bool,
        #[arg(long, default_value = "500")]
        gif_length: usize,
        /// Limit the gif check to this video
        #[arg(long)]
        gif_video: Option<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LabelArg {
    None,
    Motif,
    Community,
}

impl From<LabelArg> for LabelKind {
    fn from(value: LabelArg) -> Self {
        match value {
            LabelArg::None => Self::None,
            LabelArg::Motif => Self::Motif,
            LabelArg::Community => Self::Community,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Sampling,
    Reconstruction,
    Motifs,
    Centers,
}

impl From<ModeArg> for GenerativeMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Sampling => Self::Sampling,
            ModeArg::Reconstruction => Self::Reconstruction,
            ModeArg::Motifs => Self::Motifs,
            ModeArg::Centers => Self::Centers,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StageArg {
    PoseSegmentation,
    Community,
    MotifVideos,
    CommunityVideos,
    Gif,
}

impl From<StageArg> for Stage {
    fn from(value: StageArg) -> Self {
        match value {
            StageArg::PoseSegmentation => Self::PoseSegmentation,
            StageArg::Community => Self::Community,
            StageArg::MotifVideos => Self::MotifVideos,
            StageArg::CommunityVideos => Self::CommunityVideos,
            StageArg::Gif => Self::Gif,
        }
    }
}

fn main() -> anyhow::Result<()> {
    observability::tracing::init().context("failed to initialize tracing")?;
    let cli = Cli::parse();

    if let Command::Init {
        name,
        videos,
        working_dir,
    } = &cli.command
    {
        let path = init_new_project(name, videos, working_dir)
            .with_context(|| format!("failed to initialize project `{name}`"))?;
        println!("{}", path.display());
        return Ok(());
    }

    if matches!(cli.command, Command::UpdateConfig) {
        ConfigStore::update_config(&cli.config)
            .with_context(|| format!("failed to update {}", cli.config.display()))?;
        return Ok(());
    }

    let config = ProjectConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    match cli.command {
        Command::Init { .. } | Command::UpdateConfig => Ok(()),
        Command::TrainLinear => train_linear(&config),
        Command::Verify {
            stage,
            cohort,
            umap,
            gif_length,
            gif_video,
        } => {
            let options = ContractOptions {
                cohort,
                umap_figure: umap,
                gif_length,
                video_type: config.video_type.clone(),
            };
            verify(&config, &stage, &options, gif_video.as_deref())
        }
        command => run_stage(config, cli.synthetic_frames, command),
    }
}

fn run_stage(config: ProjectConfig, synthetic_frames: Option<usize>, command: Command) -> anyhow::Result<()> {
    let mut builder = Pipeline::builder(config);
    if let Some(frames) = synthetic_frames {
        builder = builder.with_video_backend(Arc::new(SyntheticBackend::new(frames, 320, 240)));
    }
    if let Command::PoseSegmentation { yes: true } = command {
        builder = builder.with_confirm(Arc::new(Overwrite(true)));
    }
    let pipeline = builder.build().context("invalid project config")?;

    match command {
        Command::PoseSegmentation { .. } => {
            report(&pipeline.pose_segmentation().context("pose segmentation failed")?);
        }
        Command::Community {
            cut_tree,
            cohort,
            show_umap,
            save_umap_figure,
            save_logs,
        } => {
            let options = CommunityOptions {
                cut_tree,
                cohort,
                show_umap,
                save_umap_figure,
                save_logs,
            };
            report(&pipeline.community(&options).context("community analysis failed")?);
        }
        Command::MotifVideos { save_logs } => {
            let options = ClipOptions {
                cohort: false,
                save_logs,
            };
            report(&pipeline.motif_videos(&options).context("motif videos failed")?);
        }
        Command::CommunityVideos { cohort, save_logs } => {
            let options = ClipOptions { cohort, save_logs };
            report(&pipeline.community_videos(&options).context("community videos failed")?);
        }
        Command::Visualization {
            label,
            video,
            output,
            save_logs,
        } => {
            let options = VisualizationOptions {
                label: label.into(),
                video,
                save_logs,
            };
            let figure = pipeline.visualization(&options).context("visualization failed")?;
            save_figure(&figure, output.as_deref())?;
        }
        Command::GenerativeModel {
            mode,
            video,
            samples,
            seed,
            output,
            save_logs,
        } => {
            let options = GenerativeOptions {
                mode: mode.into(),
                video,
                samples,
                seed,
                save_logs,
            };
            let figure = pipeline
                .generative_model(&options)
                .context("generative model failed")?;
            save_figure(&figure, output.as_deref())?;
        }
        Command::Gif {
            pose_ref_index,
            keep_background,
            background_frames,
            start,
            length,
            max_lag,
            label,
            file_format,
            crop_size,
            video,
            assemble_gif,
            save_logs,
        } => {
            let &[a, b] = pose_ref_index.as_slice() else {
                bail!("--pose-ref-index takes exactly two keypoints");
            };
            let options = GifOptions {
                pose_ref_index: [a, b],
                subtract_background: !keep_background,
                background_frames,
                start,
                length,
                max_lag,
                label: label.into(),
                file_format,
                crop_size: parse_crop(&crop_size)?,
                video,
                assemble_gif,
                save_logs,
            };
            report(&pipeline.gif(&options).context("gif failed")?);
        }
        Command::Init { .. } | Command::UpdateConfig | Command::TrainLinear | Command::Verify { .. } => {}
    }
    Ok(())
}

fn train_linear(config: &ProjectConfig) -> anyhow::Result<()> {
    let layout = ProjectLayout::new(config).context("invalid project config")?;
    let mut sequences = Vec::with_capacity(config.video_sets.len());
    for video in &config.video_sets {
        let path = layout.pose_data(video);
        let data = read_f32_matrix(&path)
            .with_context(|| format!("failed to read pose data for `{video}`"))?;
        sequences.push((video.clone(), data));
    }
    let model = LinearPoseModel::fit(&sequences, config.time_window, config.zdims)
        .context("failed to fit the linear model")?;
    let path = layout.model_path();
    model
        .save(&path)
        .with_context(|| format!("failed to save model to {}", path.display()))?;
    info!(path = %path.display(), zdims = model.zdims, "linear model saved");
    Ok(())
}

fn verify(
    config: &ProjectConfig,
    stages: &[StageArg],
    options: &ContractOptions,
    gif_video: Option<&str>,
) -> anyhow::Result<()> {
    let layout = ProjectLayout::new(config).context("invalid project config")?;
    let mut violations = Vec::new();
    for &stage in stages {
        let stage = Stage::from(stage);
        let videos = match (stage, gif_video) {
            (Stage::Gif, Some(video)) => vec![video.to_string()],
            _ => config.video_sets.clone(),
        };
        violations.extend(contract::verify(&contract::expectations(
            &layout, &videos, stage, options,
        )));
    }
    for violation in &violations {
        match violation {
            Violation::Missing(path) => warn!(path = %path.display(), "artifact missing"),
            Violation::CountOutOfRange {
                dir,
                suffix,
                found,
                min,
                max,
            } => warn!(
                dir = %dir.display(),
                suffix,
                found,
                min,
                max,
                "unexpected number of artifacts"
            ),
        }
    }
    if !violations.is_empty() {
        bail!("{} contract violation(s)", violations.len());
    }
    info!(stages = stages.len(), "artifact contract satisfied");
    Ok(())
}

fn report(report: &StageReport) {
    if report.skipped {
        info!(stage = %report.stage, "stage skipped");
        return;
    }
    for path in &report.artifacts {
        println!("{}", path.display());
    }
    for (name, value) in &report.counts {
        info!(stage = %report.stage, name = %name, value, "stage count");
    }
    info!(stage = %report.stage, artifacts = report.artifacts.len(), "stage completed");
}

fn save_figure(figure: &motif_worker::figure::Figure, output: Option<&Path>) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            let path = figure
                .save_png(path)
                .with_context(|| format!("failed to save figure to {}", path.display()))?;
            println!("{}", path.display());
        }
        None => println!(
            "{}",
            serde_json::to_string(figure).context("failed to serialize figure")?
        ),
    }
    Ok(())
}

fn parse_crop(value: &str) -> anyhow::Result<Option<(u32, u32)>> {
    if value.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    let (width, height) = value
        .split_once(['x', 'X'])
        .with_context(|| format!("crop size `{value}` is not WIDTHxHEIGHT"))?;
    Ok(Some((
        width.trim().parse().context("invalid crop width")?,
        height.trim().parse().context("invalid crop height")?,
    )))
}
