//! Stress verification of synthesized programs.
//!
//! The harness owns an [`ExecutionBackend`] and drives it through rounds of
//! dispatches: the fail buffer is zeroed once, every iteration clears the
//! protocol storage, dispatches the full invocation domain and fences the
//! host before the storage is reused. After the last round the fail buffer
//! decides the verdict.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use mm_types::{CaseDef, DataKind, Scope, Stage, StorageClass};

use crate::config_space;
use crate::config_space::LegalityRule;
use crate::domain::{DispatchShape, DomainConfig, TargetLimits};
use crate::env_utils::env_var_or;
use crate::errors::{BackendError, ConformanceError};
use crate::pairing::buffer_position;
use crate::report::{Verdict, VerificationReport};
use crate::synth::{synthesize, SynthesizedProgram, Var};

// =============================================================================
// Configuration
// =============================================================================

/// Default number of outer submission rounds.
pub const DEFAULT_ROUNDS: u32 = 4;

/// Default dispatches per round.
pub const DEFAULT_ITERATIONS_PER_ROUND: u32 = 50;

/// Default wall-clock budget of a single dispatch.
pub const DEFAULT_DISPATCH_TIMEOUT_MS: u64 = 10_000;

/// Default cap on violating invocations written to the log.
pub const DEFAULT_MAX_LOGGED_FAILURES: usize = 256;

pub const ENV_ROUNDS: &str = "MM_CONFORMANCE_ROUNDS";
pub const ENV_ITERATIONS: &str = "MM_CONFORMANCE_ITERATIONS";
pub const ENV_TIMEOUT_MS: &str = "MM_CONFORMANCE_TIMEOUT_MS";

/// Repetition and timeout settings of a verification run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessConfig {
    pub rounds: u32,
    pub iterations_per_round: u32,
    pub dispatch_timeout_ms: u64,
    pub max_logged_failures: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            rounds: DEFAULT_ROUNDS,
            iterations_per_round: DEFAULT_ITERATIONS_PER_ROUND,
            dispatch_timeout_ms: DEFAULT_DISPATCH_TIMEOUT_MS,
            max_logged_failures: DEFAULT_MAX_LOGGED_FAILURES,
        }
    }
}

impl HarnessConfig {
    /// Defaults overridden by `MM_CONFORMANCE_*` environment variables.
    /// Values that do not parse are ignored.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            rounds: env_var_or(ENV_ROUNDS, defaults.rounds),
            iterations_per_round: env_var_or(ENV_ITERATIONS, defaults.iterations_per_round),
            dispatch_timeout_ms: env_var_or(ENV_TIMEOUT_MS, defaults.dispatch_timeout_ms),
            ..defaults
        }
    }

    pub fn with_rounds(mut self, rounds: u32) -> Self {
        self.rounds = rounds;
        self
    }

    pub fn with_iterations_per_round(mut self, iterations: u32) -> Self {
        self.iterations_per_round = iterations;
        self
    }

    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_max_logged_failures(mut self, max: usize) -> Self {
        self.max_logged_failures = max;
        self
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    pub fn total_dispatches(&self) -> u64 {
        u64::from(self.rounds) * u64::from(self.iterations_per_round)
    }
}

// =============================================================================
// Backend interface
// =============================================================================

/// Optional target capabilities a configuration may depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Feature {
    MemoryModel,
    MemoryModelDeviceScope,
    SubgroupOps,
    Int64Atomics,
    Float64,
    PhysicalStorageBuffer,
    NonLocalMemory,
    VertexStoresAndAtomics,
    FragmentStoresAndAtomics,
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Feature::MemoryModel => "vulkanMemoryModel",
            Feature::MemoryModelDeviceScope => "vulkanMemoryModelDeviceScope",
            Feature::SubgroupOps => "subgroup basic/ballot/shuffle operations",
            Feature::Int64Atomics => "64-bit integer atomics",
            Feature::Float64 => "shaderFloat64",
            Feature::PhysicalStorageBuffer => "bufferDeviceAddress",
            Feature::NonLocalMemory => "host-visible non-local memory",
            Feature::VertexStoresAndAtomics => "vertexPipelineStoresAndAtomics",
            Feature::FragmentStoresAndAtomics => "fragmentStoresAndAtomics",
        };
        f.write_str(name)
    }
}

/// Every capability `case` needs from the target.
pub fn required_features(case: &CaseDef) -> Vec<Feature> {
    let mut features = Vec::new();
    if !case.legacy_model {
        features.push(Feature::MemoryModel);
        if case.scope == Scope::Device {
            features.push(Feature::MemoryModelDeviceScope);
        }
    }
    if case.scope == Scope::Subgroup {
        features.push(Feature::SubgroupOps);
    }
    if case.data_kind.is_64bit() {
        features.push(Feature::Int64Atomics);
    }
    if case.data_kind == DataKind::F64 {
        features.push(Feature::Float64);
    }
    let guard = case.has_guard();
    if case.payload_storage == StorageClass::PhysicalBuffer
        || (guard && case.guard_storage == StorageClass::PhysicalBuffer)
    {
        features.push(Feature::PhysicalStorageBuffer);
    }
    if !case.payload_mem_local || (guard && !case.guard_mem_local) {
        features.push(Feature::NonLocalMemory);
    }
    match case.stage {
        Stage::Compute => {}
        Stage::Vertex => features.push(Feature::VertexStoresAndAtomics),
        Stage::Fragment => features.push(Feature::FragmentStoresAndAtomics),
    }
    features
}

/// Host-side ordering point between commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostBarrier {
    /// Transfer writes complete before the program reads.
    TransferToShader,
    /// Program writes complete before the next transfer.
    ShaderToTransfer,
}

/// One recorded command of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    ZeroFailBuffer,
    /// Fill a protocol variable's backing store with `sentinel`.
    ClearStorage { var: Var, sentinel: u32 },
    Barrier(HostBarrier),
    Dispatch(DispatchShape),
}

/// The collaborator that compiles and executes synthesized programs.
pub trait ExecutionBackend {
    /// A compiled program with its bound storage.
    type Program;

    fn name(&self) -> &str;

    fn limits(&self) -> TargetLimits;

    fn supports(&self, feature: Feature) -> bool;

    fn compile(&mut self, program: &SynthesizedProgram) -> Result<Self::Program, BackendError>;

    /// Execute `commands` in order. Each dispatch must finish within `timeout`.
    fn submit(
        &mut self,
        program: &Self::Program,
        commands: &[Command],
        timeout: Duration,
    ) -> Result<(), BackendError>;

    /// One slot per invocation, indexed by the invocation's buffer coordinate.
    fn read_fail_buffer(&mut self, program: &Self::Program) -> Result<Vec<u32>, BackendError>;
}

// =============================================================================
// Harness
// =============================================================================

/// Drives verification of configurations on one backend.
pub struct ValidationHarness<B: ExecutionBackend> {
    backend: B,
    config: HarnessConfig,
}

impl<B: ExecutionBackend> ValidationHarness<B> {
    pub fn new(backend: B, config: HarnessConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Verify one configuration.
    ///
    /// Passing, failing and skipped runs all produce a report; invalid
    /// configurations, an empty dispatch schedule, compilation failures and
    /// device loss are errors.
    pub fn verify(
        &mut self,
        case: &CaseDef,
        domain: &DomainConfig,
    ) -> Result<VerificationReport, ConformanceError> {
        self.check_schedule()?;
        config_space::validate(case)?;
        let limits = self.backend.limits();
        let domain = domain.resolve(case.stage, &limits)?;
        let program = synthesize(case, &domain)?;

        if let Some(feature) = required_features(case)
            .into_iter()
            .find(|feature| !self.backend.supports(*feature))
        {
            debug!(case = %case, %feature, "skipping unsupported configuration");
            return Ok(self.skipped(&program, feature.to_string()));
        }

        self.run_program(&program)
    }

    /// Compile and stress an already synthesized program.
    pub fn run_program(
        &mut self,
        program: &SynthesizedProgram,
    ) -> Result<VerificationReport, ConformanceError> {
        self.check_schedule()?;
        let started_at = chrono::Utc::now();
        let start = Instant::now();

        let compiled = match self.backend.compile(program) {
            Ok(compiled) => compiled,
            Err(BackendError::Unsupported { feature }) => {
                debug!(case = %program.case, %feature, "backend declined configuration");
                return Ok(self.skipped(program, feature.to_string()));
            }
            Err(err) => return Err(self.fatal(program, 0, 0, err)),
        };

        self.stress(program, &compiled)?;

        let fail = self
            .backend
            .read_fail_buffer(&compiled)
            .map_err(|err| self.fatal(program, self.config.rounds, 0, err))?;
        let verdict = self.judge(program, &fail);

        let report = VerificationReport {
            path: program.case.path(),
            case: program.case,
            digest: program.text.digest(),
            backend: self.backend.name().to_string(),
            started_at,
            elapsed_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            rounds: self.config.rounds,
            iterations_per_round: self.config.iterations_per_round,
            invocation_count: program.domain.invocation_count(),
            verdict,
        };
        info!(
            case = %report.path,
            verdict = report.verdict.label(),
            elapsed_ms = report.elapsed_ms,
            "verification finished"
        );
        Ok(report)
    }

    fn stress(&mut self, program: &SynthesizedProgram, compiled: &B::Program) -> Result<(), ConformanceError> {
        let timeout = self.config.dispatch_timeout();
        self.backend
            .submit(compiled, &[Command::ZeroFailBuffer], timeout)
            .map_err(|err| self.fatal(program, 0, 0, err))?;

        let commands = round_commands(program, self.config.iterations_per_round);
        for round in 0..self.config.rounds {
            debug!(
                case = %program.case,
                round,
                iterations = self.config.iterations_per_round,
                "submitting round"
            );
            self.backend
                .submit(compiled, &commands, timeout)
                .map_err(|err| {
                    let iteration = match &err {
                        BackendError::DeviceLost {
                            completed_dispatches,
                            ..
                        }
                        | BackendError::Timeout {
                            completed_dispatches,
                            ..
                        } => u32::try_from(*completed_dispatches).unwrap_or(u32::MAX),
                        _ => 0,
                    };
                    self.fatal(program, round, iteration, err)
                })?;
        }
        Ok(())
    }

    fn check_schedule(&self) -> Result<(), ConformanceError> {
        if self.config.total_dispatches() == 0 {
            return Err(ConformanceError::ConfigurationInvalid {
                rule: LegalityRule::EmptySchedule,
            });
        }
        Ok(())
    }

    fn judge(&self, program: &SynthesizedProgram, fail: &[u32]) -> Verdict {
        let mut failures = 0u64;
        let mut sample = Vec::new();
        for (index, slot) in fail.iter().enumerate() {
            if *slot == 0 {
                continue;
            }
            failures += 1;
            if sample.len() < self.config.max_logged_failures {
                let index = u32::try_from(index).unwrap_or(u32::MAX);
                let [x, y] = buffer_position(&program.domain, program.plan.mapping, index);
                warn!(
                    case = %program.case,
                    invocation = index,
                    x,
                    y,
                    "protocol violation observed"
                );
                sample.push(index);
            }
        }
        if failures == 0 {
            Verdict::Pass
        } else {
            Verdict::Fail {
                total_failures: failures,
                failing_invocations: sample,
            }
        }
    }

    fn skipped(&self, program: &SynthesizedProgram, reason: String) -> VerificationReport {
        VerificationReport {
            path: program.case.path(),
            case: program.case,
            digest: program.text.digest(),
            backend: self.backend.name().to_string(),
            started_at: chrono::Utc::now(),
            elapsed_ms: 0,
            rounds: 0,
            iterations_per_round: self.config.iterations_per_round,
            invocation_count: program.domain.invocation_count(),
            verdict: Verdict::Skip { reason },
        }
    }

    fn fatal(
        &self,
        program: &SynthesizedProgram,
        round: u32,
        iteration: u32,
        err: BackendError,
    ) -> ConformanceError {
        match err {
            BackendError::Compilation { message } => ConformanceError::Compilation {
                stage: program.case.stage,
                message,
            },
            BackendError::Unsupported { feature } => {
                ConformanceError::UnsupportedByTarget { feature }
            }
            other => {
                error!(
                    case = %program.case,
                    backend = self.backend.name(),
                    round,
                    iteration,
                    error = %other,
                    "device lost"
                );
                ConformanceError::DeviceLost {
                    round,
                    iteration,
                    reason: other.to_string(),
                }
            }
        }
    }
}

/// Commands of one round: `iterations` clear/dispatch cycles.
pub fn round_commands(program: &SynthesizedProgram, iterations: u32) -> Vec<Command> {
    let case = &program.case;
    let mut clears = Vec::new();
    if case.payload_storage != StorageClass::Workgroup {
        clears.push(Command::ClearStorage {
            var: Var::Payload,
            sentinel: 0,
        });
    }
    if case.has_guard() && case.guard_storage != StorageClass::Workgroup {
        clears.push(Command::ClearStorage {
            var: Var::Guard,
            sentinel: 0,
        });
    }

    let mut commands = Vec::with_capacity(iterations as usize * (clears.len() + 3));
    for _ in 0..iterations {
        commands.extend_from_slice(&clears);
        commands.push(Command::Barrier(HostBarrier::TransferToShader));
        commands.push(Command::Dispatch(program.domain.dispatch_shape()));
        commands.push(Command::Barrier(HostBarrier::ShaderToTransfer));
    }
    commands
}
