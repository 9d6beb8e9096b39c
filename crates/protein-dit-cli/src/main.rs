//! protein-dit CLI
//!
//! Samples protein backbones with the diffusion transformer on the CPU
//! (ndarray) backend and writes the trajectory as JSON.

use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn_ndarray::NdArray;
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use protein_dit::features::FEATURES_PER_RESIDUE;
use protein_dit::{unflatten_atoms, FeatureNormalization, ProteinDiTConfig};
use protein_dit_core::attention::padding_mask;
use protein_dit_samplers::{
    sample_with_callback, NoiseSchedule, NoiseScheduleConfig, SampleInputs, SamplerKind,
    SamplingConfig, StepSchedule,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

mod logging;

type CpuBackend = NdArray<f32>;

#[derive(Parser)]
#[command(name = "protein-dit")]
#[command(about = "Protein backbone diffusion with a DiT denoiser")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Silence all log output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample backbones and write the trajectory as JSON
    Sample {
        /// Model configuration (JSON); defaults when omitted
        #[arg(long)]
        model_config: Option<PathBuf>,

        /// Trained weights (burn named MessagePack record)
        #[arg(short, long)]
        weights: Option<PathBuf>,

        /// Noise schedule configuration (JSON)
        #[arg(long)]
        noise_config: Option<PathBuf>,

        /// Sampling configuration (JSON); flags below override it
        #[arg(long)]
        sampling_config: Option<PathBuf>,

        /// Per-feature normalisation statistics (JSON) used to restore coordinates
        #[arg(long)]
        normalization: Option<PathBuf>,

        /// Sampler
        #[arg(long, value_enum)]
        sampler: Option<SamplerType>,

        /// Progress value spacing
        #[arg(long, value_enum)]
        schedule: Option<ScheduleType>,

        /// Number of sampling steps
        #[arg(long)]
        steps: Option<usize>,

        /// Progress value to start from (1 = pure noise)
        #[arg(long)]
        t_start: Option<f64>,

        /// Progress value to stop at
        #[arg(long)]
        t_end: Option<f64>,

        /// Number of structures to sample
        #[arg(short, long, default_value = "1")]
        batch: usize,

        /// Residues per structure
        #[arg(short, long, default_value = "128")]
        length: usize,

        /// Initial sample (JSON, [batch][residue][12], normalised space)
        #[arg(long)]
        init: Option<PathBuf>,

        /// Residue range START:END of the initial sample to keep fixed (inpainting)
        #[arg(long, value_parser = parse_range)]
        keep: Option<Range<usize>>,

        /// Random seed
        #[arg(short, long, default_value = "0")]
        seed: u64,

        /// Only write the final sample instead of the whole trajectory
        #[arg(long)]
        final_only: bool,

        /// Output path
        #[arg(short, long, default_value = "trajectory.json")]
        output: PathBuf,
    },

    /// Show model details for a configuration
    Info {
        /// Model configuration (JSON); defaults when omitted
        #[arg(long)]
        model_config: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
enum SamplerType {
    /// Stochastic DDPM-style ancestral sampling
    #[value(alias = "ddpm")]
    Ancestral,
    /// Deterministic DDIM-style sampling
    #[value(alias = "ddim")]
    Deterministic,
}

impl SamplerType {
    fn to_kind(self) -> SamplerKind {
        match self {
            SamplerType::Ancestral => SamplerKind::Ancestral,
            SamplerType::Deterministic => SamplerKind::Deterministic,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
enum ScheduleType {
    /// Evenly spaced progress values
    Linear,
    /// Align-your-steps spacing, denser near the clean end
    Ays,
}

impl ScheduleType {
    fn to_schedule(self) -> StepSchedule {
        match self {
            ScheduleType::Linear => StepSchedule::Linear,
            ScheduleType::Ays => StepSchedule::AlignYourSteps,
        }
    }
}

fn parse_range(s: &str) -> Result<Range<usize>, String> {
    let (start, end) = s
        .split_once(':')
        .ok_or_else(|| format!("expected START:END, got {s}"))?;
    let start: usize = start.trim().parse().map_err(|e| format!("invalid start: {e}"))?;
    let end: usize = end.trim().parse().map_err(|e| format!("invalid end: {e}"))?;
    if start >= end {
        return Err(format!("empty range {start}:{end}"));
    }
    Ok(start..end)
}

fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {what} from {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {what} in {}", path.display()))
}

fn read_json_or_default<T: DeserializeOwned + Default>(path: Option<&Path>, what: &str) -> Result<T> {
    path.map_or_else(|| Ok(T::default()), |path| read_json(path, what))
}

/// Trajectory file contents
#[derive(Serialize)]
struct TrajectoryOutput {
    model: String,
    sampler: String,
    seed: u64,
    shape: [usize; 3],
    /// Progress value reached after each stored step
    progress: Vec<f64>,
    /// Stored steps as [batch][residue][atom][xyz], denormalised
    steps: Vec<Vec<Vec<[[f32; 3]; 4]>>>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::setup_logging(cli.verbose, cli.quiet, cli.log_file.as_deref())?;

    match cli.command {
        Commands::Sample {
            model_config,
            weights,
            noise_config,
            sampling_config,
            normalization,
            sampler,
            schedule,
            steps,
            t_start,
            t_end,
            batch,
            length,
            init,
            keep,
            seed,
            final_only,
            output,
        } => {
            let mut config: SamplingConfig =
                read_json_or_default(sampling_config.as_deref(), "sampling config")?;
            if let Some(sampler) = sampler {
                config.sampler = sampler.to_kind();
            }
            if let Some(schedule) = schedule {
                config.schedule = schedule.to_schedule();
            }
            if let Some(steps) = steps {
                config.num_steps = steps;
            }
            if let Some(t_start) = t_start {
                config.t_start = t_start;
            }
            if let Some(t_end) = t_end {
                config.t_end = t_end;
            }

            let request = SampleRequest {
                model_config: read_json_or_default(model_config.as_deref(), "model config")?,
                noise_config: read_json_or_default(noise_config.as_deref(), "noise schedule config")?,
                normalization: read_json_or_default(normalization.as_deref(), "normalization")?,
                weights,
                config,
                batch,
                length,
                init,
                keep,
                seed,
                final_only,
            };
            run_sample(request, &output)
        }
        Commands::Info { model_config } => {
            let config: ProteinDiTConfig = read_json_or_default(model_config.as_deref(), "model config")?;
            config.validate().context("Invalid model config")?;

            println!("Model:      {}", config.model_name());
            println!("Parameters: {}", config.num_params());
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

struct SampleRequest {
    model_config: ProteinDiTConfig,
    noise_config: NoiseScheduleConfig,
    normalization: FeatureNormalization,
    weights: Option<PathBuf>,
    config: SamplingConfig,
    batch: usize,
    length: usize,
    init: Option<PathBuf>,
    keep: Option<Range<usize>>,
    seed: u64,
    final_only: bool,
}

fn run_sample(request: SampleRequest, output: &Path) -> Result<()> {
    let total_start = Instant::now();
    let device = Default::default();
    let model_config = &request.model_config;

    if request.length > model_config.seq_len {
        bail!(
            "length {} exceeds the model's maximum of {} residues",
            request.length,
            model_config.seq_len
        );
    }
    check_layout(model_config, &request.normalization)?;

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}% {msg}")?
            .progress_chars("#>-"),
    );

    pb.set_message("Initializing model...");
    pb.set_position(5);
    let model = model_config
        .init::<CpuBackend>(&device)
        .context("Invalid model config")?;
    let model = match &request.weights {
        Some(path) => {
            pb.set_message("Loading weights...");
            let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
            model
                .load_file(path.clone(), &recorder, &device)
                .with_context(|| format!("Failed to load weights from {}", path.display()))?
        }
        None => {
            info!("no weights given, sampling from an untrained model");
            model
        }
    };

    let schedule: NoiseSchedule = request.noise_config.init().context("Invalid noise schedule")?;
    let shape = [request.batch, request.length, model_config.input_dim];
    let mask = padding_mask::<CpuBackend>(&vec![request.length; request.batch], request.length, &device);
    let inputs = build_inputs(request.init.as_deref(), request.keep.clone(), shape, &device)?;

    pb.set_message("Sampling...");
    pb.set_position(10);
    let mut rng = ChaCha8Rng::seed_from_u64(request.seed);
    let mut step_start = Instant::now();

    let trajectory = sample_with_callback(
        &schedule,
        &model,
        &Some(mask),
        shape,
        inputs,
        &request.config,
        &mut rng,
        &device,
        |info| {
            // 10-90% range for sampling
            let progress = 10 + (info.step + 1) * 80 / info.total_steps;
            pb.set_position(progress as u64);
            pb.set_message(format!("Step {}/{} (t={:.3})", info.step + 1, info.total_steps, info.t_prev));
            debug!(step = info.step, elapsed = ?step_start.elapsed(), "step time");
            step_start = Instant::now();
        },
    )
    .context("Invalid sampling request")?;

    pb.set_message("Writing trajectory...");
    pb.set_position(95);

    let progress_values = request.config.progress_values();
    let mut steps: Vec<(f64, Tensor<CpuBackend, 3>)> = progress_values[1..]
        .iter()
        .copied()
        .zip(trajectory)
        .collect();
    if request.final_only {
        steps = steps.split_off(steps.len().saturating_sub(1));
    }

    let (progress, stored): (Vec<f64>, Vec<_>) = steps.into_iter().unzip();
    let out = TrajectoryOutput {
        model: model_config.model_name(),
        sampler: request.config.sampler.name().to_string(),
        seed: request.seed,
        shape,
        progress,
        steps: stored
            .into_iter()
            .map(|x| to_atoms(request.normalization.denormalize(x)))
            .collect::<Result<_>>()?,
    };
    let json = serde_json::to_string(&out)?;
    fs::write(output, json).with_context(|| format!("Failed to write {}", output.display()))?;

    pb.finish_and_clear();
    println!("Saved to: {}", output.display());
    info!(elapsed = ?total_start.elapsed(), "done");
    Ok(())
}

/// Outputs are written per backbone atom, so only the 12-feature layout is accepted
fn check_layout(config: &ProteinDiTConfig, normalization: &FeatureNormalization) -> Result<()> {
    if config.input_dim != FEATURES_PER_RESIDUE {
        bail!(
            "input_dim {} cannot be written as backbone atoms (expected {FEATURES_PER_RESIDUE})",
            config.input_dim
        );
    }
    let (mean, std) = (normalization.mean.len(), normalization.std.len());
    if mean != config.input_dim || std != config.input_dim {
        bail!(
            "normalization has {mean} means and {std} stds, expected {} of each",
            config.input_dim
        );
    }
    Ok(())
}

fn build_inputs(
    init: Option<&Path>,
    keep: Option<Range<usize>>,
    shape: [usize; 3],
    device: &<CpuBackend as Backend>::Device,
) -> Result<SampleInputs<CpuBackend>> {
    let init = match init {
        Some(path) => {
            let nested: Vec<Vec<Vec<f32>>> = read_json(path, "initial sample")?;
            let dims = [
                nested.len(),
                nested.first().map_or(0, Vec::len),
                nested.first().and_then(|s| s.first()).map_or(0, Vec::len),
            ];
            let flat: Vec<f32> = nested.into_iter().flatten().flatten().collect();
            if flat.len() != dims.iter().product::<usize>() {
                bail!("initial sample in {} is ragged", path.display());
            }
            Some(Tensor::<CpuBackend, 3>::from_data(TensorData::new(flat, dims), device))
        }
        None => None,
    };

    let [batch, seq_len, features] = shape;
    if let Some(range) = &keep {
        if range.end > seq_len {
            bail!("keep range {}:{} exceeds the length of {seq_len} residues", range.start, range.end);
        }
    }

    let inpaint_mask = keep.map(|range| {
        let values: Vec<f32> = (0..batch * seq_len * features)
            .map(|i| {
                let residue = (i / features) % seq_len;
                if range.contains(&residue) { 1.0 } else { 0.0 }
            })
            .collect();
        Tensor::<CpuBackend, 3>::from_data(TensorData::new(values, shape), device)
    });

    Ok(SampleInputs { init, inpaint_mask })
}

/// [b, s, 12] -> nested [batch][residue][atom][xyz]
fn to_atoms(x: Tensor<CpuBackend, 3>) -> Result<Vec<Vec<[[f32; 3]; 4]>>> {
    let [batch, seq_len, _] = x.dims();
    let values: Vec<f32> = unflatten_atoms(x)
        .into_data()
        .to_vec()
        .map_err(|e| anyhow::anyhow!("Failed to read sample: {e:?}"))?;

    Ok(values
        .chunks_exact(seq_len * 12)
        .take(batch)
        .map(|structure| {
            structure
                .chunks_exact(12)
                .map(|residue| {
                    std::array::from_fn(|atom| std::array::from_fn(|c| residue[atom * 3 + c]))
                })
                .collect()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("3:10"), Ok(3..10));
        assert!(parse_range("10:3").is_err());
        assert!(parse_range("5").is_err());
    }

    #[test]
    fn test_keep_range_builds_residue_mask() {
        let device = Default::default();
        let inputs = build_inputs(None, Some(1..2), [1, 3, 2], &device).unwrap();
        let mask: Vec<f32> = inputs.inpaint_mask.unwrap().into_data().to_vec().unwrap();
        assert_eq!(mask, vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0]);
        assert!(inputs.init.is_none());
    }

    #[test]
    fn test_keep_range_past_length_is_rejected() {
        let device = Default::default();
        let err = build_inputs(None, Some(2..5), [1, 4, 12], &device).unwrap_err();
        assert!(err.to_string().contains("exceeds the length"));
        assert!(build_inputs(None, Some(2..4), [1, 4, 12], &device).is_ok());
    }

    #[test]
    fn test_layout_check() {
        let backbone = ProteinDiTConfig::tiny();
        assert!(check_layout(&backbone, &FeatureNormalization::default()).is_ok());

        let narrow = ProteinDiTConfig {
            input_dim: 6,
            ..ProteinDiTConfig::tiny()
        };
        let narrow_norm = FeatureNormalization::new(vec![0.0; 6], vec![1.0; 6]);
        assert!(narrow.validate().is_ok());
        assert!(check_layout(&narrow, &narrow_norm).is_err());

        let short_norm = FeatureNormalization::new(vec![0.0; 6], vec![1.0; 6]);
        let err = check_layout(&backbone, &short_norm).unwrap_err();
        assert!(err.to_string().contains("normalization"));
    }

    #[test]
    fn test_to_atoms_layout() {
        let device = Default::default();
        let values: Vec<f32> = (0..24).map(|v| v as f32).collect();
        let x = Tensor::<CpuBackend, 3>::from_data(TensorData::new(values, [1, 2, 12]), &device);
        let atoms = to_atoms(x).unwrap();

        assert_eq!(atoms.len(), 1);
        assert_eq!(atoms[0].len(), 2);
        assert_eq!(atoms[0][1][3], [21.0, 22.0, 23.0]);
    }

    #[test]
    fn test_cli_parses_sample_flags() {
        let cli = Cli::try_parse_from([
            "protein-dit", "-vv", "sample", "--sampler", "ddim", "--schedule", "ays", "--steps", "10",
            "--keep", "0:4",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Sample { sampler, schedule, steps, keep, .. } => {
                assert_eq!(sampler, Some(SamplerType::Deterministic));
                assert_eq!(schedule, Some(ScheduleType::Ays));
                assert_eq!(steps, Some(10));
                assert_eq!(keep, Some(0..4));
            }
            Commands::Info { .. } => panic!("expected sample"),
        }
    }
}
