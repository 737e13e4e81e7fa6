//! GLSL rendering of a [`ProtocolPlan`].

use std::fmt::Write as _;

use mm_types::{CaseDef, DataKind, Scope, Stage, StorageClass};

use super::plan::{Attached, Op, ProtocolPlan, Slot, Var};
use super::{Binding, ResourceKind};
use crate::domain::InvocationDomain;
use crate::pairing;

/// Vertex program drawing a fullscreen triangle strip from `gl_VertexIndex`.
pub const FULLSCREEN_STRIP_VERTEX: &str = concat!(
    "#version 450 core\n",
    "vec2 coords[4] = {ivec2(-1,-1), ivec2(-1, 1), ivec2(1, -1), ivec2(1, 1)};\n",
    "void main() { gl_Position = vec4(coords[gl_VertexIndex], 0, 1); }\n",
);

const INDENT: &str = "   ";

pub(crate) struct Rendered {
    pub source: String,
    pub auxiliary: Option<String>,
    pub bindings: Vec<Binding>,
}

pub(crate) fn render(plan: &ProtocolPlan, domain: &InvocationDomain) -> Rendered {
    let renderer = Renderer { case: &plan.case };
    let mut src = String::new();
    let mut bindings = Vec::new();

    renderer.header(&mut src);
    renderer.declarations(&mut src, &mut bindings, plan.uses_transitive_flag());

    src.push_str("void main()\n{\n");
    src.push_str("   bool skip = false;\n");
    for op in &plan.ops {
        renderer.op(&mut src, op, domain, INDENT);
    }
    src.push_str("}\n");

    let auxiliary = (plan.case.stage == Stage::Fragment).then(|| FULLSCREEN_STRIP_VERTEX.to_string());
    Rendered {
        source: src,
        auxiliary,
        bindings,
    }
}

pub fn scope_glsl(scope: Scope) -> &'static str {
    match scope {
        Scope::Device => "gl_ScopeDevice",
        Scope::QueueFamily => "gl_ScopeQueueFamily",
        Scope::Workgroup => "gl_ScopeWorkgroup",
        Scope::Subgroup => "gl_ScopeSubgroup",
    }
}

/// Memory qualifier of the payload declaration.
pub fn memory_qualifier(case: &CaseDef) -> &'static str {
    match (case.coherent, case.legacy_model) {
        (true, true) => "coherent",
        (true, false) => match case.scope {
            Scope::Device => "devicecoherent",
            Scope::QueueFamily => "queuefamilycoherent",
            Scope::Workgroup => "workgroupcoherent",
            Scope::Subgroup => "subgroupcoherent",
        },
        (false, _) => "nonprivate",
    }
}

pub fn payload_type(data: DataKind) -> &'static str {
    match data {
        DataKind::U32 => "uint",
        DataKind::U64 => "uint64_t",
        DataKind::F32 => "float",
        DataKind::F64 => "double",
    }
}

/// Guards use the unsigned integer type of the payload's width.
pub fn guard_type(data: DataKind) -> &'static str {
    if data.is_64bit() {
        "uint64_t"
    } else {
        "uint"
    }
}

struct Renderer<'a> {
    case: &'a CaseDef,
}

impl Renderer<'_> {
    fn storage(&self, var: Var) -> StorageClass {
        match var {
            Var::Payload => self.case.payload_storage,
            Var::Guard => self.case.guard_storage,
        }
    }

    fn name(var: Var) -> &'static str {
        match var {
            Var::Payload => "payload",
            Var::Guard => "guard",
        }
    }

    fn element_type(&self, var: Var) -> &'static str {
        match var {
            Var::Payload => payload_type(self.case.data_kind),
            Var::Guard => guard_type(self.case.data_kind),
        }
    }

    fn uses_physical_buffers(&self) -> bool {
        self.case.payload_storage == StorageClass::PhysicalBuffer
            || (self.case.has_guard() && self.case.guard_storage == StorageClass::PhysicalBuffer)
    }

    fn header(&self, src: &mut String) {
        src.push_str("#version 450 core\n");
        if !self.case.legacy_model {
            src.push_str("#pragma use_vulkan_memory_model\n");
        }
        src.push_str(concat!(
            "#extension GL_KHR_shader_subgroup_basic : enable\n",
            "#extension GL_KHR_shader_subgroup_shuffle : enable\n",
            "#extension GL_KHR_shader_subgroup_ballot : enable\n",
            "#extension GL_KHR_memory_scope_semantics : enable\n",
            "#extension GL_ARB_gpu_shader_int64 : enable\n",
        ));
        if self.case.data_kind.is_64bit() {
            src.push_str("#extension GL_EXT_shader_atomic_int64 : enable\n");
        }
        if self.uses_physical_buffers() {
            src.push_str("#extension GL_EXT_buffer_reference : enable\n");
        }
        src.push_str(concat!(
            "// DIM and NUM_WORKGROUP_EACH_DIM are overridden by specialization constants\n",
            "layout(constant_id = 0) const int DIM = 1;\n",
            "layout(constant_id = 1) const int NUM_WORKGROUP_EACH_DIM = 1;\n",
        ));
        if self.case.stage == Stage::Compute {
            src.push_str(
                "layout(local_size_x_id = 0, local_size_y_id = 0, local_size_z = 1) in;\n",
            );
        }
    }

    fn declarations(&self, src: &mut String, bindings: &mut Vec<Binding>, transitive_flag: bool) {
        let mut references = Vec::new();
        self.declare(src, bindings, &mut references, Var::Payload, 0);
        if self.case.has_guard() {
            self.declare(src, bindings, &mut references, Var::Guard, 1);
        }
        if !references.is_empty() {
            src.push_str("layout(push_constant) uniform References {");
            for (ty, name) in &references {
                let _ = write!(src, " {} {};", ty, name);
            }
            src.push_str(" } refs;\n");
        }
        src.push_str("layout(set=0, binding=2) buffer Fail { uint x[]; } fail;\n");
        bindings.push(Binding {
            name: "fail".to_string(),
            slot: Some(2),
            kind: ResourceKind::StorageBuffer,
        });
        if transitive_flag {
            src.push_str("shared uint transitiveFlag;\n");
        }
    }

    fn declare(
        &self,
        src: &mut String,
        bindings: &mut Vec<Binding>,
        references: &mut Vec<(String, &'static str)>,
        var: Var,
        slot: u32,
    ) {
        let name = Self::name(var);
        let ty = self.element_type(var);
        // Guards are only touched through atomics and need no qualifier.
        let qualifier = match var {
            Var::Payload => format!("{} ", memory_qualifier(self.case)),
            Var::Guard => String::new(),
        };
        let block = match var {
            Var::Payload => "Payload",
            Var::Guard => "Guard",
        };
        let kind = match self.storage(var) {
            StorageClass::Buffer => {
                let _ = writeln!(
                    src,
                    "layout(set=0, binding={}) {}buffer {} {{ {} x[]; }} {};",
                    slot, qualifier, block, ty, name
                );
                ResourceKind::StorageBuffer
            }
            StorageClass::Image => {
                let _ = writeln!(
                    src,
                    "layout(set=0, binding={}, r32ui) uniform {}uimage2D {};",
                    slot, qualifier, name
                );
                ResourceKind::StorageImage
            }
            StorageClass::Workgroup => {
                let _ = writeln!(src, "struct {}Shared {{ {} x[DIM*DIM]; }};", block, ty);
                let _ = writeln!(src, "shared {}Shared {};", block, name);
                ResourceKind::Workgroup
            }
            StorageClass::PhysicalBuffer => {
                let align = if self.case.data_kind.is_64bit() {
                    ", buffer_reference_align = 8"
                } else {
                    ""
                };
                let _ = writeln!(
                    src,
                    "layout(buffer_reference, std430{}) {}buffer {}Ref {{ {} x[]; }};",
                    align, qualifier, block, ty
                );
                references.push((format!("{}Ref", block), name));
                ResourceKind::PhysicalBufferReference
            }
        };
        bindings.push(Binding {
            name: name.to_string(),
            slot: matches!(kind, ResourceKind::StorageBuffer | ResourceKind::StorageImage)
                .then_some(slot),
            kind,
        });
    }

    fn base(&self, var: Var) -> String {
        match self.storage(var) {
            StorageClass::PhysicalBuffer => format!("refs.{}", Self::name(var)),
            _ => Self::name(var).to_string(),
        }
    }

    fn index(&self, var: Var, slot: Slot) -> &'static str {
        match (self.storage(var), slot) {
            (StorageClass::Workgroup, Slot::Own | Slot::OwnWorkgroup) => "sharedCoord",
            (StorageClass::Workgroup, Slot::Partner | Slot::PartnerWorkgroup) => {
                "partnerSharedCoord"
            }
            (StorageClass::Image, Slot::Own) => "imageCoord",
            (StorageClass::Image, Slot::Partner) => "partnerImageCoord",
            (StorageClass::Image, Slot::OwnWorkgroup) => "workgroupId",
            (StorageClass::Image, Slot::PartnerWorkgroup) => "partnerWorkgroupId",
            (_, Slot::Own) => "bufferCoord",
            (_, Slot::Partner) => "partnerBufferCoord",
            (_, Slot::OwnWorkgroup) => "workgroupCoord",
            (_, Slot::PartnerWorkgroup) => "partnerWorkgroupCoord",
        }
    }

    fn element(&self, var: Var, slot: Slot) -> String {
        format!("{}.x[{}]", self.base(var), self.index(var, slot))
    }

    fn payload_is_image(&self) -> bool {
        self.case.payload_storage == StorageClass::Image
    }

    /// Unsigned bit pattern of a payload value.
    fn to_bits(&self, expr: &str) -> String {
        if self.payload_is_image() {
            return expr.to_string();
        }
        match self.case.data_kind {
            DataKind::U32 | DataKind::U64 => expr.to_string(),
            DataKind::F32 => format!("floatBitsToUint({})", expr),
            DataKind::F64 => format!("doubleBitsToUint64({})", expr),
        }
    }

    /// Payload value with the given unsigned bit pattern.
    fn from_bits(&self, expr: &str) -> String {
        if self.payload_is_image() {
            return expr.to_string();
        }
        match self.case.data_kind {
            DataKind::U32 | DataKind::U64 => expr.to_string(),
            DataKind::F32 => format!("uintBitsToFloat({})", expr),
            DataKind::F64 => format!("uint64BitsToDouble({})", expr),
        }
    }

    /// A coordinate widened to the payload's bit width.
    fn tag(&self, coord: &str) -> String {
        if !self.payload_is_image() && self.case.data_kind.is_64bit() {
            format!("uint64_t({})", coord)
        } else {
            coord.to_string()
        }
    }

    fn load_payload(&self, slot: Slot) -> String {
        if self.payload_is_image() {
            format!("imageLoad(payload, {}).x", self.index(Var::Payload, slot))
        } else {
            self.element(Var::Payload, slot)
        }
    }

    fn store_payload(&self, value: &str) -> String {
        if self.payload_is_image() {
            format!("imageStore(payload, imageCoord, uvec4({}, 0, 0, 0));", value)
        } else {
            format!(
                "{} = {};",
                self.element(Var::Payload, Slot::Own),
                self.from_bits(value)
            )
        }
    }

    fn value_type(&self) -> &'static str {
        if self.payload_is_image() {
            "uint"
        } else {
            payload_type(self.case.data_kind)
        }
    }

    fn atomic_tail(scope: Scope, attached: &Option<Attached>) -> String {
        match attached {
            Some(a) => format!(
                "{}, {}, {}",
                scope_glsl(scope),
                a.storage.glsl(),
                a.semantics.glsl()
            ),
            None => format!("{}, 0, 0", scope_glsl(scope)),
        }
    }

    fn guard_write(&self, slot: Slot, scope: Scope, rmw: bool, attached: &Option<Attached>) -> String {
        let tail = Self::atomic_tail(scope, attached);
        let function = if rmw { "Exchange" } else { "Store" };
        match self.storage(Var::Guard) {
            StorageClass::Image => format!(
                "imageAtomic{}(guard, {}, 1u, {});",
                function,
                self.index(Var::Guard, slot),
                tail
            ),
            _ => format!(
                "atomic{}({}, {}(1u), {});",
                function,
                self.element(Var::Guard, slot),
                guard_type(self.case.data_kind),
                tail
            ),
        }
    }

    fn guard_read(&self, slot: Slot, scope: Scope, rmw: bool, attached: &Option<Attached>) -> String {
        let tail = Self::atomic_tail(scope, attached);
        let call = match (self.storage(Var::Guard), rmw) {
            (StorageClass::Image, true) => format!(
                "imageAtomicExchange(guard, {}, 2u, {})",
                self.index(Var::Guard, slot),
                tail
            ),
            (StorageClass::Image, false) => format!(
                "imageAtomicLoad(guard, {}, {})",
                self.index(Var::Guard, slot),
                tail
            ),
            (_, true) => format!(
                "atomicExchange({}, {}(2u), {})",
                self.element(Var::Guard, slot),
                guard_type(self.case.data_kind),
                tail
            ),
            (_, false) => format!("atomicLoad({}, {})", self.element(Var::Guard, slot), tail),
        };
        format!("skip = {} == 0;", call)
    }

    fn op(&self, src: &mut String, op: &Op, domain: &InvocationDomain, indent: &str) {
        let mut line = |text: String| {
            src.push_str(indent);
            src.push_str(&text);
            src.push('\n');
        };
        match op {
            Op::KillHelpers => line("if (gl_HelperInvocation) { return; }".to_string()),
            Op::BailIfPartnerInactive => src.push_str(pairing::SUBGROUP_BAIL),
            Op::Coordinates { mapping } => {
                src.push_str(&pairing::coordinate_source(*mapping, self.case.stage))
            }
            Op::TransitiveCoordinates => src.push_str(&pairing::transitive_source(domain)),
            Op::InitShared { var } => line(format!(
                "{} = {}(0);",
                self.element(*var, Slot::Own),
                self.element_type(*var)
            )),
            Op::ScopeBarrier { scope } => line(match scope {
                Scope::Subgroup => "subgroupBarrier();".to_string(),
                _ => "barrier();".to_string(),
            }),
            Op::WritePayload => {
                let partner = self.to_bits(&self.load_payload(Slot::Partner));
                let value = format!("{} + ({}>>31)", self.tag("bufferCoord"), partner);
                line(format!("if (paired) {{ {} }}", self.store_payload(&value)));
            }
            Op::WritePayloadIfObserved => line(format!(
                "if (paired && !skip) {{ {} }}",
                self.store_payload(&self.tag("bufferCoord"))
            )),
            Op::LoadPayload => line(format!(
                "{} r = {};",
                self.value_type(),
                self.load_payload(Slot::Partner)
            )),
            Op::MemoryBarrier { scope, attached } => line(format!(
                "memoryBarrier({}, {}, {});",
                scope_glsl(*scope),
                attached.storage.glsl(),
                attached.semantics.glsl()
            )),
            Op::ControlBarrier { execution, memory } => line(match memory {
                Some((scope, attached)) => format!(
                    "controlBarrier({}, {}, {}, {});",
                    scope_glsl(*execution),
                    scope_glsl(*scope),
                    attached.storage.glsl(),
                    attached.semantics.glsl()
                ),
                None => format!(
                    "controlBarrier({}, gl_ScopeInvocation, 0, 0);",
                    scope_glsl(*execution)
                ),
            }),
            Op::GuardRelease {
                slot,
                scope,
                rmw,
                attached,
            } => line(self.guard_write(*slot, *scope, *rmw, attached)),
            Op::GuardAcquire {
                slot,
                scope,
                rmw,
                attached,
            } => line(self.guard_read(*slot, *scope, *rmw, attached)),
            Op::Leader(inner) => {
                line("if (leader) {".to_string());
                let nested = format!("{}{}", indent, INDENT);
                for op in inner {
                    self.op(src, op, domain, &nested);
                }
                src.push_str(indent);
                src.push_str("}\n");
            }
            Op::PublishFlag => line("transitiveFlag = skip ? 0u : 1u;".to_string()),
            Op::ReadFlag => line("skip = transitiveFlag == 0u;".to_string()),
            Op::CheckMessage => line(format!(
                "if (paired && !skip && {} != {}) {{ fail.x[bufferCoord] = 1; }}",
                self.to_bits("r"),
                self.tag("partnerBufferCoord")
            )),
            Op::CheckWriteAfterRead => line(format!(
                "if (paired && {} != 0) {{ fail.x[bufferCoord] = 1; }}",
                self.to_bits("r")
            )),
        }
    }
}
