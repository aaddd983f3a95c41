//! Interpreter loop and run-limit accounting.

use crate::context::ExecutionContext;
use crate::numeric::{as_bool, as_u256, u256_to_u64};
use crate::opcodes::{parse_op, Instruction};
use crate::ops;
use crate::stack::{Stack, Underflow};
use crate::{VmError, VmResult, VM_VERSION};
use primitive_types::U256;
use tracing::{debug, trace};

/// Memory cost of holding one item on the data stack.
pub const ITEM_OVERHEAD: i64 = 8;

/// Default upper bound on program size.
pub const DEFAULT_MAX_PROGRAM_LEN: usize = 1 << 20;

/// Static VM parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    pub max_program_len: usize,
    pub vm_version: u64,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_program_len: DEFAULT_MAX_PROGRAM_LEN,
            vm_version: VM_VERSION,
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Execution {
    /// Run limit consumed at the end of the program, refunds included.
    pub gas_used: u64,
    /// Highest consumption observed at any point during the run.
    pub gas_peak: u64,
}

/// Bytecode interpreter.
#[derive(Debug, Clone, Default)]
pub struct VirtualMachine {
    config: VmConfig,
}

impl VirtualMachine {
    pub fn new(config: VmConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Execute `program` with `args` as the initial data stack.
    ///
    /// Succeeds only if the program runs to completion within `gas_limit`
    /// and leaves a true item on top of the data stack.
    pub fn run(
        &self,
        program: &[u8],
        args: &[Vec<u8>],
        gas_limit: u64,
        context: &dyn ExecutionContext,
    ) -> VmResult<Execution> {
        if self.config.vm_version != VM_VERSION {
            return Err(VmError::UnsupportedVm {
                version: self.config.vm_version,
            });
        }
        if program.len() > self.config.max_program_len {
            return Err(VmError::LongProgram {
                len: program.len(),
                max: self.config.max_program_len,
            });
        }

        let limit = i64::try_from(gas_limit).unwrap_or(i64::MAX);
        let mut machine = Machine::new(program, limit, context);
        for arg in args {
            machine.push(arg.clone())?;
        }

        let result = machine.execute();
        debug!(
            program_len = program.len(),
            gas_used = machine.consumed(),
            ok = result.is_ok(),
            "program finished"
        );
        result?;

        Ok(Execution {
            gas_used: machine.consumed(),
            gas_peak: machine.peak(),
        })
    }
}

/// Run `program` with the default configuration.
pub fn run(
    program: &[u8],
    args: &[Vec<u8>],
    gas_limit: u64,
    context: &dyn ExecutionContext,
) -> VmResult<Execution> {
    VirtualMachine::default().run(program, args, gas_limit, context)
}

/// Mutable interpreter state for one run.
pub(crate) struct Machine<'a> {
    program: &'a [u8],
    pub(crate) pc: u32,
    pub(crate) next_pc: u32,
    initial_limit: i64,
    run_limit: i64,
    min_run_limit: i64,
    pub(crate) data: Stack,
    pub(crate) alt: Stack,
    pub(crate) context: &'a dyn ExecutionContext,
}

impl<'a> Machine<'a> {
    pub(crate) fn new(program: &'a [u8], limit: i64, context: &'a dyn ExecutionContext) -> Self {
        Self {
            program,
            pc: 0,
            next_pc: 0,
            initial_limit: limit,
            run_limit: limit,
            min_run_limit: limit,
            data: Stack::new(),
            alt: Stack::new(),
            context,
        }
    }

    fn execute(&mut self) -> VmResult<()> {
        while (self.pc as usize) < self.program.len() {
            let inst = parse_op(self.program, self.pc)?;
            self.next_pc = self.pc.saturating_add(inst.len);
            trace!(pc = self.pc, opcode = inst.byte, remaining = self.run_limit, "step");
            self.step(&inst)?;
            self.pc = self.next_pc;
        }

        match self.data.peek(0) {
            Some(top) if as_bool(top) => Ok(()),
            _ => Err(VmError::FalseResult),
        }
    }

    fn step(&mut self, inst: &Instruction<'_>) -> VmResult<()> {
        match inst.op {
            Some(op) => ops::dispatch(self, op, inst.data),
            None => {
                self.apply_cost(1)?;
                Err(VmError::DisallowedOpcode { opcode: inst.byte })
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn remaining(&self) -> i64 {
        self.run_limit
    }

    fn consumed(&self) -> u64 {
        (self.initial_limit - self.run_limit).max(0) as u64
    }

    fn peak(&self) -> u64 {
        (self.initial_limit - self.min_run_limit).max(0) as u64
    }

    /// Debit `n` from the run limit.
    pub(crate) fn apply_cost(&mut self, n: i64) -> VmResult<()> {
        if n > self.run_limit {
            return Err(VmError::RunLimitExceeded {
                needed: n,
                remaining: self.run_limit,
            });
        }
        self.run_limit -= n;
        self.min_run_limit = self.min_run_limit.min(self.run_limit);
        Ok(())
    }

    /// Apply one opcode's memory charge and refund as a single net change.
    pub(crate) fn settle(&mut self, charge: i64, refund: i64) -> VmResult<()> {
        let net = charge.saturating_sub(refund);
        if net > 0 {
            self.apply_cost(net)
        } else {
            self.run_limit = self.run_limit.saturating_sub(net);
            Ok(())
        }
    }

    /// Fail with a data stack underflow unless `n` items are present.
    pub(crate) fn require(&self, n: usize) -> VmResult<()> {
        self.data.ensure(n).map_err(data_underflow)
    }

    /// Item `depth` below the top of the data stack. Callers check depth first.
    pub(crate) fn peek(&self, depth: usize) -> VmResult<&[u8]> {
        self.data.peek(depth).ok_or(VmError::DataStackUnderflow {
            required: depth + 1,
            available: self.data.len(),
        })
    }

    pub(crate) fn peek_num(&self, depth: usize) -> VmResult<U256> {
        as_u256(self.peek(depth)?)
    }

    pub(crate) fn peek_u64(&self, depth: usize) -> VmResult<u64> {
        u256_to_u64(self.peek_num(depth)?)
    }

    /// Push with memory accounting.
    pub(crate) fn push(&mut self, item: Vec<u8>) -> VmResult<()> {
        self.apply_cost(item_cost(&item))?;
        self.data.push(item);
        Ok(())
    }

    /// Pop the top `pops` items and push `pushes`, settling memory once.
    ///
    /// Nothing changes if the stack is too short or the charge fails.
    pub(crate) fn replace(&mut self, pops: usize, pushes: Vec<Vec<u8>>) -> VmResult<()> {
        self.require(pops)?;
        let refund: i64 = (0..pops)
            .filter_map(|d| self.data.peek(d))
            .map(item_cost)
            .sum();
        let charge: i64 = pushes.iter().map(|i| item_cost(i)).sum();
        self.settle(charge, refund)?;
        for _ in 0..pops {
            self.data.pop();
        }
        for item in pushes {
            self.data.push(item);
        }
        Ok(())
    }

    pub(crate) fn jump(&mut self, target: u32) {
        self.next_pc = target;
    }
}

/// Memory cost of one stack item.
pub(crate) fn item_cost(item: &[u8]) -> i64 {
    ITEM_OVERHEAD.saturating_add(item.len() as i64)
}

pub(crate) fn data_underflow(u: Underflow) -> VmError {
    VmError::DataStackUnderflow {
        required: u.required,
        available: u.available,
    }
}

pub(crate) fn alt_underflow(u: Underflow) -> VmError {
    VmError::AltStackUnderflow {
        required: u.required,
        available: u.available,
    }
}
