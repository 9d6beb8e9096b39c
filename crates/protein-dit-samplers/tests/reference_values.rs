//! Integration tests against JSON fixtures of closed-form reference values.
//!
//! To regenerate fixtures: `python scripts/gen_sampler_fixtures.py`

use burn::prelude::*;
use burn_ndarray::NdArray;
use protein_dit_samplers::{
    sample, AncestralSampler, Denoiser, NoiseSchedule, P2Weighting, SampleInputs, SamplerKind,
    SamplingConfig, StepSchedule,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

type TestBackend = NdArray<f32>;

/// Relative tolerance for tensor comparisons
const REL_EPSILON: f64 = 1e-5;

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn load_fixture() -> Fixture {
    let content = fs::read_to_string(fixtures_dir().join("reference_values.json"))
        .expect("Failed to read fixture");
    serde_json::from_str(&content).expect("Failed to parse fixture")
}

fn assert_rel_eq(expected: f64, actual: f64, name: &str) {
    let diff = (expected - actual).abs();
    assert!(
        diff <= REL_EPSILON * expected.abs().max(1.0),
        "{}: expected {}, got {} (diff: {})",
        name,
        expected,
        actual,
        diff
    );
}

fn tensor(values: &[f32], shape: [usize; 3]) -> Tensor<TestBackend, 3> {
    Tensor::from_data(TensorData::new(values.to_vec(), shape), &Default::default())
}

fn to_vec(t: Tensor<TestBackend, 3>) -> Vec<f32> {
    t.into_data().to_vec().unwrap()
}

#[derive(Debug, Deserialize)]
struct Fixture {
    schedule: ScheduleFixture,
    deterministic: DeterministicFixture,
    ancestral: AncestralFixture,
}

#[derive(Debug, Deserialize)]
struct ScheduleFixture {
    t: Vec<f64>,
    alpha_cumprod: Vec<f64>,
    p2_weight: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct DeterministicFixture {
    shape: [usize; 3],
    init: Vec<f32>,
    eps_scale: f32,
    progress: Vec<f64>,
    trajectory: Vec<Vec<f64>>,
}

#[derive(Debug, Deserialize)]
struct AncestralFixture {
    shape: [usize; 3],
    x: Vec<f32>,
    eps_scale: f32,
    noise: Vec<f32>,
    t: f64,
    t_prev: f64,
    expected: Vec<f64>,
}

/// Predicts a fixed multiple of its input
struct ScaledInput(f32);

impl Denoiser<TestBackend> for ScaledInput {
    type Conditioning = ();

    fn predict_noise(&self, x: Tensor<TestBackend, 3>, _t: &[f64], _: &()) -> Tensor<TestBackend, 3> {
        x * self.0
    }
}

#[test]
fn test_alpha_cumprod_matches_reference() {
    let fixture = load_fixture().schedule;
    let schedule = NoiseSchedule::default();

    for (t, expected) in fixture.t.iter().zip(&fixture.alpha_cumprod) {
        assert_rel_eq(*expected, schedule.alpha_cumprod(*t), &format!("alpha_cumprod({t})"));
    }
}

#[test]
fn test_p2_weight_matches_reference() {
    let fixture = load_fixture().schedule;
    let schedule = NoiseSchedule::default();
    let weights = P2Weighting::default().weights(&schedule, &fixture.t);

    for ((t, expected), actual) in fixture.t.iter().zip(&fixture.p2_weight).zip(weights) {
        assert_rel_eq(*expected, actual, &format!("p2_weight({t})"));
    }
}

#[test]
fn test_two_step_deterministic_trajectory() {
    let fixture = load_fixture().deterministic;
    assert_eq!(fixture.progress, vec![1.0, 0.5, 0.0]);

    let config = SamplingConfig {
        num_steps: fixture.progress.len() - 1,
        t_start: fixture.progress[0],
        t_end: fixture.progress[fixture.progress.len() - 1],
        sampler: SamplerKind::Deterministic,
        schedule: StepSchedule::Linear,
    };
    let mut rng = ChaCha8Rng::seed_from_u64(0);

    let trajectory = sample(
        &NoiseSchedule::default(),
        &ScaledInput(fixture.eps_scale),
        &(),
        fixture.shape,
        SampleInputs::from_init(tensor(&fixture.init, fixture.shape)),
        &config,
        &mut rng,
        &Default::default(),
    )
    .expect("valid sampling config");

    assert_eq!(trajectory.len(), fixture.trajectory.len());
    for (step, (actual, expected)) in trajectory.into_iter().zip(&fixture.trajectory).enumerate() {
        for (i, (a, e)) in to_vec(actual).iter().zip(expected).enumerate() {
            assert_rel_eq(*e, *a as f64, &format!("step {step} [{i}]"));
        }
    }
}

#[test]
fn test_ancestral_step_with_injected_noise() {
    let fixture = load_fixture().ancestral;
    let mut sampler = AncestralSampler::<TestBackend>::new(NoiseSchedule::default());

    let x = tensor(&fixture.x, fixture.shape);
    let eps = x.clone() * fixture.eps_scale;
    let noise = tensor(&fixture.noise, fixture.shape);
    let out = sampler.step_with_noise(x, &[fixture.t], &[fixture.t_prev], eps, noise);

    for (i, (a, e)) in to_vec(out).iter().zip(&fixture.expected).enumerate() {
        assert_rel_eq(*e, *a as f64, &format!("ancestral[{i}]"));
    }
}
