//! Flow actions and instructions.
//!
//! These are carried by a flow entry as its "effect" and are never part of
//! any index key. The table only inspects them to answer out-port queries.

use crate::MatchField;
use serde::{Deserialize, Serialize};

/// Wildcard port value (`OFPP_ANY`).
pub const OFPP_ANY: u32 = 0xffff_ffff;

/// A single packet action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Output { port: u32 },
    Group { group_id: u32 },
    SetQueue { queue_id: u32 },
    SetField { field: MatchField, value: u128 },
    PushVlan { ethertype: u16 },
    PopVlan,
    DecNwTtl,
}

/// A flow instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Instruction {
    ApplyActions(Vec<Action>),
    WriteActions(Vec<Action>),
    ClearActions,
    GotoTable(u8),
    WriteMetadata { metadata: u64, mask: u64 },
    Meter(u32),
}

/// Ordered instruction set of a flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Instructions(Vec<Instruction>);

impl Instructions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for a single apply-actions instruction.
    pub fn apply(actions: Vec<Action>) -> Self {
        Self(vec![Instruction::ApplyActions(actions)])
    }

    pub fn with(mut self, instruction: Instruction) -> Self {
        self.0.push(instruction);
        self
    }

    pub fn push(&mut self, instruction: Instruction) {
        self.0.push(instruction);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instruction> {
        self.0.iter()
    }

    /// Iterates over every action in apply/write instructions.
    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.0.iter().flat_map(|instruction| match instruction {
            Instruction::ApplyActions(actions) | Instruction::WriteActions(actions) => {
                actions.as_slice()
            }
            _ => &[][..],
        })
    }

    /// Returns true if any action outputs to `port`. `OFPP_ANY` matches
    /// everything.
    pub fn outputs_to(&self, port: u32) -> bool {
        port == OFPP_ANY
            || self
                .actions()
                .any(|action| matches!(action, Action::Output { port: p } if *p == port))
    }
}

impl From<Vec<Instruction>> for Instructions {
    fn from(instructions: Vec<Instruction>) -> Self {
        Self(instructions)
    }
}
