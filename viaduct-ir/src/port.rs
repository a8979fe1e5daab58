// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Ports and dependence rules.
//!
//! Ports define the I/O channels of blocks. An [`InputPortId`] accepts
//! tokens from at most one [`OutputPortId`]; an output may drive many
//! inputs. Port identity is the arena key, so two distinct ports are never
//! equal even when their owners and types coincide.

use slotmap::new_key_type;

use crate::time::Latency;
use crate::types::Type;

new_key_type! {
    /// Arena key of a [`crate::block::Block`].
    pub struct BlockId;
    /// Arena key of a [`Port`].
    pub struct PortId;
    /// Arena key of a [`crate::module::Module`].
    pub struct ModuleId;
}

/// A sink-side port key. The wrapper gives connection APIs a compile-time
/// source/sink distinction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InputPortId(pub PortId);

/// A source-side port key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutputPortId(pub PortId);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortDir {
    Input,
    Output,
}

/// One I/O channel of a block.
#[derive(Clone, Debug)]
pub struct Port {
    pub owner: BlockId,
    pub dir: PortDir,
    pub ty: Type,
    pub name: Option<String>,
}

impl Port {
    pub fn new(owner: BlockId, dir: PortDir, ty: Type, name: Option<String>) -> Port {
        Port {
            owner,
            dir,
            ty,
            name,
        }
    }
}

/// How the listed inputs combine to trigger an output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputType {
    /// All inputs are required and consumed.
    And,
    /// Any one input triggers the output.
    Or,
    /// Block-specific semantics.
    Custom,
}

/// Whether the output fires on every firing of the block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputType {
    Always,
    Maybe,
}

/// Describes the internal relationship of one output to the block's inputs.
#[derive(Clone, Debug)]
pub struct DependenceRule {
    pub input_type: InputType,
    pub output_type: OutputType,
    /// The subset of the block's inputs this output depends on.
    pub inputs: Vec<InputPortId>,
    /// Per-dep latency, parallel to `inputs`.
    pub latencies: Vec<Latency>,
}

impl DependenceRule {
    pub fn new(input_type: InputType, output_type: OutputType, inputs: Vec<InputPortId>) -> Self {
        let latencies = vec![Latency::combinational(); inputs.len()];
        DependenceRule {
            input_type,
            output_type,
            inputs,
            latencies,
        }
    }

    /// The canonical combinational contract: all inputs required, exactly
    /// one token each per firing, output always produced.
    pub fn and_fire_one(inputs: Vec<InputPortId>) -> Self {
        DependenceRule::new(InputType::And, OutputType::Always, inputs)
    }

    /// A rule with block-specific firing semantics.
    pub fn custom(inputs: Vec<InputPortId>) -> Self {
        DependenceRule::new(InputType::Custom, OutputType::Maybe, inputs)
    }

    pub fn with_latency(mut self, latency: Latency) -> Self {
        for l in &mut self.latencies {
            *l = latency;
        }
        self
    }

    pub fn is_and_fire_one(&self) -> bool {
        self.input_type == InputType::And && self.output_type == OutputType::Always
    }

    /// Combine two rules. Equal kinds survive, disagreements collapse to
    /// `Custom`; `Always + Maybe = Maybe`. Used when folding rules along a
    /// dependency trace.
    pub fn combine(&self, other: &DependenceRule) -> DependenceRule {
        let input_type = if self.input_type == other.input_type {
            self.input_type
        } else {
            InputType::Custom
        };
        let output_type = if self.output_type == other.output_type {
            self.output_type
        } else {
            OutputType::Maybe
        };
        DependenceRule {
            input_type,
            output_type,
            inputs: Vec::new(),
            latencies: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_is_a_monoid() {
        let and = DependenceRule::and_fire_one(vec![]);
        let or = DependenceRule::new(InputType::Or, OutputType::Always, vec![]);
        let maybe = DependenceRule::new(InputType::And, OutputType::Maybe, vec![]);

        let c = and.combine(&and);
        assert_eq!(c.input_type, InputType::And);
        assert_eq!(c.output_type, OutputType::Always);

        let c = and.combine(&or);
        assert_eq!(c.input_type, InputType::Custom);
        assert_eq!(c.output_type, OutputType::Always);

        let c = and.combine(&maybe);
        assert_eq!(c.input_type, InputType::And);
        assert_eq!(c.output_type, OutputType::Maybe);
    }
}
