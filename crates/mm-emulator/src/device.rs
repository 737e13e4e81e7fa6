//! The reference device: a sequentially consistent interpreter of protocol plans.
//!
//! A dispatch keeps a pool of runnable (invocation, segment) tasks and picks
//! the next one with a seeded RNG. Segments end at execution barriers, so a
//! workgroup only advances to its next segment once every live member has
//! finished the current one. Within a segment an invocation runs without
//! interruption; all other interleavings are left to the scheduler.

use std::cell::RefCell;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace, warn};

use mm_conformance_core::domain::{InvocationDomain, TargetLimits};
use mm_conformance_core::errors::BackendError;
use mm_conformance_core::harness::{required_features, Command, ExecutionBackend, Feature};
use mm_conformance_core::pairing::{Coordinates, MirrorPairing, Pairing, PairingModel};
use mm_conformance_core::synth::{Op, Slot, SynthesizedProgram, Var};
use mm_types::{CaseDef, Stage, StorageClass};

use crate::config::ReferenceConfig;

/// Uninitialised workgroup memory reads as this pattern.
const SHARED_POISON: u64 = 0xDEAD_BEEF;

pub const BACKEND_NAME: &str = "reference-emulator";

#[derive(Debug, Clone, Copy)]
struct Invocation {
    group: u32,
    leader: bool,
    pairing: Pairing,
}

/// Backing store of the non-workgroup protocol variables.
#[derive(Debug, Default)]
struct Resources {
    payload: Vec<u64>,
    guard: Vec<u64>,
}

impl Resources {
    fn var_mut(&mut self, var: Var) -> &mut Vec<u64> {
        match var {
            Var::Payload => &mut self.payload,
            Var::Guard => &mut self.guard,
        }
    }
}

/// A program prepared for the reference device, owning its storage.
#[derive(Debug)]
pub struct CompiledProgram {
    case: CaseDef,
    domain: InvocationDomain,
    digest: String,
    segments: Vec<Vec<Op>>,
    invocations: Vec<Invocation>,
    members: Vec<Vec<u32>>,
    resources: RefCell<Resources>,
}

impl CompiledProgram {
    pub fn case(&self) -> &CaseDef {
        &self.case
    }

    pub fn domain(&self) -> &InvocationDomain {
        &self.domain
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    fn storage(&self, var: Var) -> StorageClass {
        match var {
            Var::Payload => self.case.payload_storage,
            Var::Guard => self.case.guard_storage,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct State {
    alive: bool,
    skip: bool,
    r: u64,
}

#[derive(Debug, Clone, Copy)]
enum Location {
    Global(usize),
    Shared(usize),
}

/// Per-dispatch machine state.
struct Machine<'a> {
    program: &'a CompiledProgram,
    memory: &'a mut Resources,
    fail: &'a mut [u32],
    shared_payload: Vec<u64>,
    shared_guard: Vec<u64>,
    flags: Vec<u64>,
    deferred: Vec<(Location, u64)>,
    defer_payload_stores: bool,
}

impl Machine<'_> {
    fn locate(&self, var: Var, slot: Slot, group: u32, own: &Coordinates, partner: &Coordinates) -> Location {
        let domain = &self.program.domain;
        let coords = match slot {
            Slot::Own | Slot::OwnWorkgroup => own,
            Slot::Partner | Slot::PartnerWorkgroup => partner,
        };
        let per_workgroup = matches!(slot, Slot::OwnWorkgroup | Slot::PartnerWorkgroup);
        match self.program.storage(var) {
            StorageClass::Workgroup => Location::Shared(
                group as usize * domain.tile_invocations() as usize + coords.shared as usize,
            ),
            StorageClass::Image if per_workgroup => {
                Location::Global(coords.workgroup_image_index(domain) as usize)
            }
            StorageClass::Image => Location::Global(coords.image_index(domain) as usize),
            StorageClass::Buffer | StorageClass::PhysicalBuffer if per_workgroup => {
                Location::Global(coords.workgroup_index(domain) as usize)
            }
            StorageClass::Buffer | StorageClass::PhysicalBuffer => {
                Location::Global(coords.buffer as usize)
            }
        }
    }

    fn cell(&mut self, var: Var, location: Location) -> Option<&mut u64> {
        let store = match (var, location) {
            (Var::Payload, Location::Global(_)) => &mut self.memory.payload,
            (Var::Guard, Location::Global(_)) => &mut self.memory.guard,
            (Var::Payload, Location::Shared(_)) => &mut self.shared_payload,
            (Var::Guard, Location::Shared(_)) => &mut self.shared_guard,
        };
        let (Location::Global(index) | Location::Shared(index)) = location;
        store.get_mut(index)
    }

    /// Out-of-range reads return zero and writes are dropped.
    fn load(&mut self, var: Var, location: Location) -> u64 {
        self.cell(var, location).map(|v| *v).unwrap_or(0)
    }

    fn store(&mut self, var: Var, location: Location, value: u64) {
        if let Some(cell) = self.cell(var, location) {
            *cell = value;
        }
    }

    fn store_payload(&mut self, location: Location, value: u64) {
        if self.defer_payload_stores {
            self.deferred.push((location, value));
        } else {
            self.store(Var::Payload, location, value);
        }
    }

    fn record_failure(&mut self, own: &Coordinates) {
        if let Some(slot) = self.fail.get_mut(own.buffer as usize) {
            *slot = 1;
        }
    }

    fn run(&mut self, index: usize, state: &mut State, ops: &[Op]) {
        for op in ops {
            if !state.alive {
                return;
            }
            self.step(index, state, op);
        }
    }

    fn step(&mut self, index: usize, state: &mut State, op: &Op) {
        let invocation = self.program.invocations[index];
        let (own, partner, paired) = match invocation.pairing {
            Pairing::Paired { own, partner } => (own, partner, true),
            Pairing::Singleton { own } => (own, own, false),
            Pairing::PartnerInactive => {
                state.alive = false;
                return;
            }
        };
        let group = invocation.group;

        match op {
            Op::KillHelpers
            | Op::BailIfPartnerInactive
            | Op::Coordinates { .. }
            | Op::TransitiveCoordinates
            | Op::ScopeBarrier { .. }
            | Op::MemoryBarrier { .. }
            | Op::ControlBarrier { .. } => {}
            Op::InitShared { var } => {
                let location = self.locate(*var, Slot::Own, group, &own, &partner);
                self.store(*var, location, 0);
            }
            Op::WritePayload => {
                if paired {
                    let source = self.locate(Var::Payload, Slot::Partner, group, &own, &partner);
                    let value = u64::from(own.buffer) + (self.load(Var::Payload, source) >> 31);
                    let target = self.locate(Var::Payload, Slot::Own, group, &own, &partner);
                    self.store_payload(target, value);
                }
            }
            Op::WritePayloadIfObserved => {
                if paired && !state.skip {
                    let target = self.locate(Var::Payload, Slot::Own, group, &own, &partner);
                    self.store_payload(target, u64::from(own.buffer));
                }
            }
            Op::LoadPayload => {
                let source = self.locate(Var::Payload, Slot::Partner, group, &own, &partner);
                state.r = self.load(Var::Payload, source);
            }
            Op::GuardRelease { slot, .. } => {
                let location = self.locate(Var::Guard, *slot, group, &own, &partner);
                self.store(Var::Guard, location, 1);
            }
            Op::GuardAcquire { slot, rmw, .. } => {
                let location = self.locate(Var::Guard, *slot, group, &own, &partner);
                let observed = self.load(Var::Guard, location);
                if *rmw {
                    self.store(Var::Guard, location, 2);
                }
                state.skip = observed == 0;
            }
            Op::Leader(inner) => {
                if invocation.leader {
                    self.run(index, state, inner);
                }
            }
            Op::PublishFlag => {
                if let Some(flag) = self.flags.get_mut(group as usize) {
                    *flag = u64::from(!state.skip);
                }
            }
            Op::ReadFlag => {
                state.skip = self.flags.get(group as usize).copied().unwrap_or(0) == 0;
            }
            Op::CheckMessage => {
                if paired && !state.skip && state.r != u64::from(partner.buffer) {
                    self.record_failure(&own);
                }
            }
            Op::CheckWriteAfterRead => {
                if paired && state.r != 0 {
                    self.record_failure(&own);
                }
            }
        }
    }

    fn commit_deferred(&mut self) {
        for (location, value) in std::mem::take(&mut self.deferred) {
            self.store(Var::Payload, location, value);
        }
    }
}

/// CPU execution backend with sequentially consistent memory.
pub struct ReferenceDevice {
    config: ReferenceConfig,
    rng: StdRng,
    fail: Vec<u32>,
    dispatches: u64,
}

impl ReferenceDevice {
    pub fn new(config: ReferenceConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            fail: Vec::new(),
            dispatches: 0,
        }
    }

    pub fn config(&self) -> &ReferenceConfig {
        &self.config
    }

    /// Dispatches executed since the device was created.
    pub fn dispatches(&self) -> u64 {
        self.dispatches
    }

    fn dispatch(&mut self, program: &CompiledProgram) {
        let domain = &program.domain;
        let groups = program.members.len();
        let tile = domain.tile_invocations() as usize;
        let shared_len = |var: Var| {
            if program.storage(var) == StorageClass::Workgroup
                && (var == Var::Payload || program.case.has_guard())
            {
                groups * tile
            } else {
                0
            }
        };

        let mut resources = program.resources.borrow_mut();
        let mut machine = Machine {
            program,
            memory: &mut *resources,
            fail: &mut self.fail,
            shared_payload: vec![SHARED_POISON; shared_len(Var::Payload)],
            shared_guard: vec![SHARED_POISON; shared_len(Var::Guard)],
            flags: vec![SHARED_POISON; groups],
            deferred: Vec::new(),
            defer_payload_stores: self.config.faults.defer_payload_stores,
        };

        let mut states: Vec<State> = program
            .invocations
            .iter()
            .map(|inv| State {
                alive: inv.pairing.own().is_some(),
                ..State::default()
            })
            .collect();

        let mut segment = vec![0usize; groups];
        let mut pending = vec![0usize; groups];
        let mut ready: Vec<u32> = Vec::with_capacity(states.len());
        for (group, members) in program.members.iter().enumerate() {
            for &member in members {
                if states[member as usize].alive {
                    ready.push(member);
                    pending[group] += 1;
                }
            }
        }

        while !ready.is_empty() {
            let pick = self.rng.gen_range(0..ready.len());
            let index = ready.swap_remove(pick) as usize;
            let group = program.invocations[index].group as usize;
            machine.run(index, &mut states[index], &program.segments[segment[group]]);

            pending[group] -= 1;
            if pending[group] == 0 {
                segment[group] += 1;
                if segment[group] < program.segments.len() {
                    for &member in &program.members[group] {
                        if states[member as usize].alive {
                            ready.push(member);
                            pending[group] += 1;
                        }
                    }
                }
            }
        }

        machine.commit_deferred();
    }
}

impl Default for ReferenceDevice {
    fn default() -> Self {
        Self::new(ReferenceConfig::default())
    }
}

impl ExecutionBackend for ReferenceDevice {
    type Program = CompiledProgram;

    fn name(&self) -> &str {
        BACKEND_NAME
    }

    fn limits(&self) -> TargetLimits {
        TargetLimits {
            max_workgroup_invocations: self.config.max_workgroup_invocations,
            subgroup_size: self.config.effective_subgroup_size(),
        }
    }

    fn supports(&self, feature: Feature) -> bool {
        self.config.capabilities.supports(feature)
    }

    fn compile(&mut self, program: &SynthesizedProgram) -> Result<CompiledProgram, BackendError> {
        if let Some(feature) = required_features(&program.case)
            .into_iter()
            .find(|feature| !self.supports(*feature))
        {
            return Err(BackendError::Unsupported { feature });
        }
        if !program.text.source.contains("void main()") {
            return Err(BackendError::Compilation {
                message: format!("{}: no entry point", program.text.name),
            });
        }
        let domain = program.domain;
        if domain.stage == Stage::Compute
            && domain.tile_invocations() > self.config.max_workgroup_invocations
        {
            return Err(BackendError::Compilation {
                message: format!(
                    "workgroup of {} invocations exceeds the limit of {}",
                    domain.tile_invocations(),
                    self.config.max_workgroup_invocations
                ),
            });
        }

        let subgroup_size = self.config.effective_subgroup_size();
        let model: &dyn PairingModel = match &self.config.faults.pairing {
            Some(model) => model.as_ref(),
            None => &MirrorPairing,
        };

        let count = domain.invocation_count() as usize;
        let mut invocations = Vec::with_capacity(count);
        let mut members = vec![Vec::new(); domain.workgroup_count() as usize];
        for id in domain.invocations() {
            let group = domain.group_of(id);
            members[group as usize].push(invocations.len() as u32);
            invocations.push(Invocation {
                group,
                leader: domain.is_leader(id),
                pairing: model.pair(&domain, program.plan.mapping, subgroup_size, id),
            });
        }

        let segments: Vec<Vec<Op>> = program
            .plan
            .segments()
            .into_iter()
            .map(|segment| segment.to_vec())
            .collect();

        let global_len = |storage: StorageClass| match storage {
            StorageClass::Workgroup => 0,
            _ => count,
        };
        let resources = Resources {
            payload: vec![0; global_len(program.case.payload_storage)],
            guard: if program.case.has_guard() {
                vec![0; global_len(program.case.guard_storage)]
            } else {
                Vec::new()
            },
        };

        if self.fail.len() < count {
            self.fail.resize(count, 0);
        }

        debug!(
            case = %program.case,
            invocations = count,
            segments = segments.len(),
            subgroup_size,
            "compiled program for reference device"
        );

        Ok(CompiledProgram {
            case: program.case,
            domain,
            digest: program.text.digest(),
            segments,
            invocations,
            members,
            resources: RefCell::new(resources),
        })
    }

    fn submit(
        &mut self,
        program: &CompiledProgram,
        commands: &[Command],
        timeout: Duration,
    ) -> Result<(), BackendError> {
        let mut completed = 0u64;
        for command in commands {
            match command {
                Command::ZeroFailBuffer => self.fail.iter_mut().for_each(|slot| *slot = 0),
                Command::ClearStorage { var, sentinel } => {
                    let mut resources = program.resources.borrow_mut();
                    resources
                        .var_mut(*var)
                        .iter_mut()
                        .for_each(|cell| *cell = u64::from(*sentinel));
                }
                // Every command completes before the next starts.
                Command::Barrier(_) => {}
                Command::Dispatch(shape) => {
                    if *shape != program.domain.dispatch_shape() {
                        return Err(BackendError::Other {
                            message: format!(
                                "dispatch shape {:?} does not match the program's domain",
                                shape
                            ),
                        });
                    }
                    if let Some(limit) = self.config.faults.lose_device_after {
                        if self.dispatches >= limit {
                            warn!(dispatches = self.dispatches, "injected device loss");
                            return Err(BackendError::DeviceLost {
                                completed_dispatches: completed,
                                reason: format!("device lost after {} dispatch(es)", limit),
                            });
                        }
                    }

                    let start = Instant::now();
                    self.dispatch(program);
                    if let Some(stall) = self.config.faults.stall {
                        std::thread::sleep(stall);
                    }
                    self.dispatches += 1;

                    let elapsed = start.elapsed();
                    trace!(
                        dispatch = self.dispatches,
                        elapsed_us = elapsed.as_micros() as u64,
                        "dispatch complete"
                    );
                    if elapsed > timeout {
                        return Err(BackendError::Timeout {
                            completed_dispatches: completed,
                            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                        });
                    }
                    completed += 1;
                }
            }
        }
        Ok(())
    }

    fn read_fail_buffer(&mut self, program: &CompiledProgram) -> Result<Vec<u32>, BackendError> {
        let count = program.domain.invocation_count() as usize;
        self.fail
            .get(..count)
            .map(<[u32]>::to_vec)
            .ok_or_else(|| BackendError::Other {
                message: "fail buffer smaller than the invocation domain".to_string(),
            })
    }
}
