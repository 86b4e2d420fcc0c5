//! Stimulus programs.
//!
//! A program is a flat sequence of micro-ops; the PC is an index into it.
//! Programs are built directly in tests or parsed from a small assembly-like
//! text format by the CLI:
//!
//! ```text
//! li   r1, 0x100
//! ld   r2, 8(r1), 8
//! add  r3, r2, r1
//! st   r3, 16(r1), 8
//! beq  r3, r0, 0
//! halt
//! ```

use std::fmt;
use std::str::FromStr;

use crate::common::Addr;
use crate::core::inst::{AluOp, BranchCond, MicroOp};

/// An executable stimulus program.
#[derive(Clone, Debug, Default)]
pub struct Program {
    ops: Vec<MicroOp>,
}

impl Program {
    pub fn from_ops(ops: Vec<MicroOp>) -> Self {
        Self { ops }
    }

    pub fn op_at(&self, pc: Addr) -> Option<MicroOp> {
        self.ops.get(pc as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Parse failure for the text format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ParseError {}

fn parse_reg(tok: &str, line: usize) -> Result<usize, ParseError> {
    tok.trim_start_matches('r')
        .parse()
        .map_err(|_| ParseError { line, message: format!("bad register '{}'", tok) })
}

fn parse_imm(tok: &str, line: usize) -> Result<u64, ParseError> {
    let tok = tok.trim();
    let parsed = if let Some(hex) = tok.strip_prefix("0x") {
        u64::from_str_radix(hex, 16)
    } else {
        tok.parse()
    };
    parsed.map_err(|_| ParseError { line, message: format!("bad immediate '{}'", tok) })
}

/// Parse `offset(base)` memory operands.
fn parse_mem_operand(tok: &str, line: usize) -> Result<(i64, usize), ParseError> {
    let open = tok.find('(').ok_or_else(|| ParseError {
        line,
        message: format!("bad memory operand '{}'", tok),
    })?;
    let close = tok.find(')').ok_or_else(|| ParseError {
        line,
        message: format!("bad memory operand '{}'", tok),
    })?;
    let offset_str = &tok[..open];
    let offset = if offset_str.is_empty() {
        0
    } else {
        parse_imm(offset_str.trim_start_matches('-'), line)? as i64
            * if offset_str.starts_with('-') { -1 } else { 1 }
    };
    let base = parse_reg(&tok[open + 1..close], line)?;
    Ok((offset, base))
}

impl FromStr for Program {
    type Err = ParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut ops = Vec::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = lineno + 1;
            let code = raw.split('#').next().unwrap_or("").trim();
            if code.is_empty() {
                continue;
            }

            let mut parts = code.split_whitespace();
            let mnemonic = parts.next().unwrap().to_lowercase();
            let rest: Vec<String> = parts
                .collect::<Vec<_>>()
                .join(" ")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();

            let arg = |idx: usize| -> Result<&str, ParseError> {
                rest.get(idx).map(|s| s.as_str()).ok_or_else(|| ParseError {
                    line,
                    message: format!("missing operand {} for '{}'", idx + 1, mnemonic),
                })
            };

            let op = match mnemonic.as_str() {
                "nop" => MicroOp::Nop,
                "li" => MicroOp::AluImm {
                    op: AluOp::Add,
                    rd: parse_reg(arg(0)?, line)?,
                    rs1: 0,
                    imm: parse_imm(arg(1)?, line)?,
                },
                "addi" => MicroOp::AluImm {
                    op: AluOp::Add,
                    rd: parse_reg(arg(0)?, line)?,
                    rs1: parse_reg(arg(1)?, line)?,
                    imm: parse_imm(arg(2)?, line)?,
                },
                "add" | "sub" | "and" | "or" | "xor" | "mul" => {
                    let alu = match mnemonic.as_str() {
                        "add" => AluOp::Add,
                        "sub" => AluOp::Sub,
                        "and" => AluOp::And,
                        "or" => AluOp::Or,
                        "xor" => AluOp::Xor,
                        _ => AluOp::Mul,
                    };
                    MicroOp::Alu {
                        op: alu,
                        rd: parse_reg(arg(0)?, line)?,
                        rs1: parse_reg(arg(1)?, line)?,
                        rs2: parse_reg(arg(2)?, line)?,
                    }
                }
                "ld" => {
                    let (offset, base) = parse_mem_operand(arg(1)?, line)?;
                    MicroOp::Load {
                        rd: parse_reg(arg(0)?, line)?,
                        base,
                        offset,
                        size: parse_imm(arg(2)?, line)? as u8,
                    }
                }
                "ldo" => {
                    let (offset, base) = parse_mem_operand(arg(1)?, line)?;
                    MicroOp::LoadOrdered {
                        rd: parse_reg(arg(0)?, line)?,
                        base,
                        offset,
                        size: parse_imm(arg(2)?, line)? as u8,
                    }
                }
                "st" => {
                    let (offset, base) = parse_mem_operand(arg(1)?, line)?;
                    MicroOp::Store {
                        src: parse_reg(arg(0)?, line)?,
                        base,
                        offset,
                        size: parse_imm(arg(2)?, line)? as u8,
                    }
                }
                "amoadd" => {
                    let (_, base) = parse_mem_operand(arg(2)?, line)?;
                    MicroOp::AtomicAdd {
                        rd: parse_reg(arg(0)?, line)?,
                        src: parse_reg(arg(1)?, line)?,
                        base,
                        size: parse_imm(arg(3)?, line)? as u8,
                    }
                }
                "beq" | "bne" | "blt" | "bge" => {
                    let cond = match mnemonic.as_str() {
                        "beq" => BranchCond::Eq,
                        "bne" => BranchCond::Ne,
                        "blt" => BranchCond::Lt,
                        _ => BranchCond::Ge,
                    };
                    MicroOp::Branch {
                        cond,
                        rs1: parse_reg(arg(0)?, line)?,
                        rs2: parse_reg(arg(1)?, line)?,
                        target: parse_imm(arg(2)?, line)?,
                    }
                }
                "jmp" => MicroOp::Jump { target: parse_imm(arg(0)?, line)? },
                "serialize" => MicroOp::Serialize,
                "wrmisc" => MicroOp::WrMisc {
                    idx: parse_imm(arg(0)?.trim_start_matches('m'), line)? as usize,
                    rs1: parse_reg(arg(1)?, line)?,
                },
                "htmstart" => MicroOp::HtmStart,
                "htmstop" => MicroOp::HtmStop,
                "trap" => MicroOp::Trap { code: parse_imm(arg(0)?, line)? },
                "halt" => MicroOp::Halt,
                other => {
                    return Err(ParseError {
                        line,
                        message: format!("unknown mnemonic '{}'", other),
                    })
                }
            };
            ops.push(op);
        }
        Ok(Program { ops })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_program() {
        let prog: Program = "\
            # warm up
            li   r1, 0x100
            ld   r2, 8(r1), 8
            add  r3, r2, r1
            st   r3, 16(r1), 8
            beq  r3, r0, 0
            halt"
            .parse()
            .unwrap();

        assert_eq!(prog.len(), 6);
        assert_eq!(
            prog.op_at(1),
            Some(MicroOp::Load { rd: 2, base: 1, offset: 8, size: 8 })
        );
        assert_eq!(prog.op_at(5), Some(MicroOp::Halt));
        assert_eq!(prog.op_at(6), None);
    }

    #[test]
    fn test_parse_negative_offset() {
        let prog: Program = "ld r2, -8(r1), 4".parse().unwrap();
        assert_eq!(
            prog.op_at(0),
            Some(MicroOp::Load { rd: 2, base: 1, offset: -8, size: 4 })
        );
    }

    #[test]
    fn test_parse_error_reports_line() {
        let err = "nop\nbogus r1".parse::<Program>().unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("bogus"));
    }
}
