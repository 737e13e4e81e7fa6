//! Registration names: formatting and parsing.
//!
//! Names look like
//! `[mustpass11_]{coherent|noncoherent}_{sync}[_rmw][_u64|_f32|_f64]_payload[_local|_nonlocal]_{sc}[_guard[_local|_nonlocal]_{sc}]_scope_{scope}_{stage}[_vis_leader]`.
//! Workgroup storage never carries a locality token, and barrier sync kinds
//! omit the guard segment entirely.

use crate::{CaseDef, DataKind, Scope, Stage, StorageClass, SyncKind, TestKind};

const LEGACY_PREFIX: &str = "mustpass11_";
const VIS_LEADER_SUFFIX: &str = "_vis_leader";

/// Error returned when a case path cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    /// The path has no `group/` prefix.
    MissingGroup { path: String },
    /// The group is not one of the registered families.
    UnknownGroup { group: String },
    /// A token was expected at the given position.
    Expected {
        expected: &'static str,
        remainder: String,
    },
    /// Tokens are left over after a complete name.
    Trailing { remainder: String },
}

impl std::fmt::Display for NameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NameError::MissingGroup { path } => {
                write!(f, "case path '{}' is missing a group prefix", path)
            }
            NameError::UnknownGroup { group } => write!(
                f,
                "unknown group '{}' (expected message_passing, write_after_read or transitive)",
                group
            ),
            NameError::Expected {
                expected,
                remainder,
            } => write!(f, "expected {} at '{}'", expected, remainder),
            NameError::Trailing { remainder } => {
                write!(f, "unexpected trailing tokens '{}'", remainder)
            }
        }
    }
}

impl std::error::Error for NameError {}

fn locality(storage: StorageClass, local: bool) -> &'static str {
    match (storage, local) {
        (StorageClass::Workgroup, _) => "",
        (_, true) => "_local",
        (_, false) => "_nonlocal",
    }
}

pub(crate) fn format_name(case: &CaseDef) -> String {
    let mut name = String::new();
    if case.legacy_model {
        name.push_str(LEGACY_PREFIX);
    }
    name.push_str(if case.coherent {
        "coherent"
    } else {
        "noncoherent"
    });
    name.push('_');
    name.push_str(case.sync_kind.token());
    if case.atomic_rmw {
        name.push_str("_rmw");
    }
    name.push_str(case.data_kind.suffix());

    name.push_str("_payload");
    name.push_str(locality(case.payload_storage, case.payload_mem_local));
    name.push('_');
    name.push_str(case.payload_storage.token());

    if case.has_guard() {
        name.push_str("_guard");
        name.push_str(locality(case.guard_storage, case.guard_mem_local));
        name.push('_');
        name.push_str(case.guard_storage.token());
    }

    name.push_str("_scope_");
    name.push_str(case.scope.token());
    name.push('_');
    name.push_str(case.stage.token());

    if case.transitive && case.transitive_vis_at_leader {
        name.push_str(VIS_LEADER_SUFFIX);
    }
    name
}

/// Consuming cursor over a name.
struct Cursor<'a> {
    rest: &'a str,
}

impl<'a> Cursor<'a> {
    fn eat(&mut self, token: &str) -> bool {
        match self.rest.strip_prefix(token) {
            Some(rest) => {
                self.rest = rest;
                true
            }
            None => false,
        }
    }

    fn expect(&mut self, token: &'static str) -> Result<(), NameError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.expected(token))
        }
    }

    /// Consume the first candidate whose token (after `prefix`) matches.
    fn one_of<T: Copy>(
        &mut self,
        prefix: &str,
        candidates: &[T],
        token: impl Fn(T) -> &'static str,
        what: &'static str,
    ) -> Result<T, NameError> {
        for candidate in candidates {
            let full = format!("{}{}", prefix, token(*candidate));
            if self.eat(&full) {
                return Ok(*candidate);
            }
        }
        Err(self.expected(what))
    }

    fn locality(&mut self) -> Option<bool> {
        if self.eat("_nonlocal") {
            Some(false)
        } else if self.eat("_local") {
            Some(true)
        } else {
            None
        }
    }

    fn expected(&self, expected: &'static str) -> NameError {
        NameError::Expected {
            expected,
            remainder: self.rest.to_string(),
        }
    }
}

pub(crate) fn parse_path(path: &str) -> Result<CaseDef, NameError> {
    let (group, name) = path.split_once('/').ok_or_else(|| NameError::MissingGroup {
        path: path.to_string(),
    })?;

    let mut case = CaseDef::default();
    match group {
        "message_passing" => case.test_kind = TestKind::MessagePassing,
        "write_after_read" => case.test_kind = TestKind::WriteAfterRead,
        "transitive" => case.transitive = true,
        other => {
            return Err(NameError::UnknownGroup {
                group: other.to_string(),
            })
        }
    }

    let mut cursor = Cursor { rest: name };
    case.legacy_model = cursor.eat(LEGACY_PREFIX);
    case.coherent = if cursor.eat("noncoherent") {
        false
    } else if cursor.eat("coherent") {
        true
    } else {
        return Err(cursor.expected("coherent or noncoherent"));
    };

    case.sync_kind = cursor.one_of("_", &SyncKind::ALL, SyncKind::token, "sync kind")?;
    case.atomic_rmw = cursor.eat("_rmw");
    case.data_kind = [DataKind::U64, DataKind::F32, DataKind::F64]
        .into_iter()
        .find(|kind| cursor.eat(kind.suffix()))
        .unwrap_or(DataKind::U32);

    cursor.expect("_payload")?;
    case.payload_mem_local = cursor.locality().unwrap_or(true);
    case.payload_storage =
        cursor.one_of("_", &StorageClass::ALL, StorageClass::token, "payload storage")?;

    if cursor.eat("_guard") {
        case.guard_mem_local = cursor.locality().unwrap_or(true);
        case.guard_storage =
            cursor.one_of("_", &StorageClass::ALL, StorageClass::token, "guard storage")?;
    }

    case.scope = cursor.one_of("_scope_", &Scope::ALL, Scope::token, "scope")?;
    case.stage = cursor.one_of("_", &Stage::ALL, Stage::token, "stage")?;

    if case.transitive {
        case.transitive_vis_at_leader = cursor.eat(VIS_LEADER_SUFFIX);
    }

    if !cursor.rest.is_empty() {
        return Err(NameError::Trailing {
            remainder: cursor.rest.to_string(),
        });
    }
    Ok(case)
}
