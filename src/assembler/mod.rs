//! Two-pass assembler: label resolution and directive processing in pass 1
//! (`preprocess`), per-opcode encoding into 32-bit machine words in pass 2
//! (`store_instructions`). Grounded in the original `simulator::preprocess`/
//! `storeInstructions` pair (`simulator.hh`), reworked into free functions
//! over an explicit `Memory` handle instead of private fields on a God
//! object.

pub mod lexer;
pub mod numeric;

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::isa::instructions::Instruction;
use crate::isa::registers;
use crate::memory::Memory;
use lexer::{format_line, split_words};
use numeric::{parse_data, parse_signed, parse_unsigned, NumericError};

/// Text grows from address 0; data starts at 0x10000 (§3, §6).
pub const TEXT_BASE: i64 = 0;
pub const DATA_BASE: i64 = 0x10000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidLabel(String),
    DuplicateLabel(String),
    IllegalDirective(String),
    UnknownInstruction(String),
    WrongArity { expected: usize, found: usize },
    InvalidRegister(String),
    InvalidImmediate(String),
    ImmediateTooLarge(u32),
    InvalidDataValue(String),
    LabelUndefined(String),
    /// Not one of spec.md §7's kinds: surfaces a file read failure from
    /// `Simulator::load` through the same collected-error channel.
    Io(String),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::InvalidLabel(s) => write!(f, "invalid label '{s}'"),
            ErrorKind::DuplicateLabel(s) => write!(f, "duplicate label '{s}'"),
            ErrorKind::IllegalDirective(s) => write!(f, "illegal directive '{s}'"),
            ErrorKind::UnknownInstruction(s) => write!(f, "unknown instruction '{s}'"),
            ErrorKind::WrongArity { expected, found } => {
                write!(f, "expected {expected} operand(s), found {found}")
            }
            ErrorKind::InvalidRegister(s) => write!(f, "invalid register '{s}'"),
            ErrorKind::InvalidImmediate(s) => write!(f, "invalid immediate '{s}'"),
            ErrorKind::ImmediateTooLarge(w) => write!(f, "immediate out of range for {w}-bit field"),
            ErrorKind::InvalidDataValue(s) => write!(f, "invalid data value '{s}'"),
            ErrorKind::LabelUndefined(s) => write!(f, "undefined label '{s}'"),
            ErrorKind::Io(s) => write!(f, "{s}"),
        }
    }
}

fn numeric_err(e: NumericError) -> ErrorKind {
    match e {
        NumericError::InvalidImmediate(s) => ErrorKind::InvalidImmediate(s),
        NumericError::ImmediateTooLarge(w) => ErrorKind::ImmediateTooLarge(w),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembleError {
    pub line: usize,
    pub kind: ErrorKind,
}

impl fmt::Display for AssembleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Line {}: {}", self.line, self.kind)
    }
}

impl std::error::Error for AssembleError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Empty,
    Instruction,
}

#[derive(Debug, Clone, Copy)]
pub struct Label {
    pub address: i64,
    pub line: usize,
}

/// The assembled program: one entry per source line (1-indexed), the label
/// table, and the address→line relation used to recompute `lineCounter`
/// after a jump (§4.5, §9 — a binary search over this monotone map instead
/// of a linear scan, see DESIGN.md).
#[derive(Debug)]
pub struct Program {
    kinds: Vec<LineKind>,
    pub labels: HashMap<String, Label>,
    addr_to_line: Vec<(i64, usize)>,
    label_by_address: BTreeMap<i64, String>,
}

impl Program {
    pub fn line_count(&self) -> usize {
        self.kinds.len()
    }

    pub fn kind_at(&self, line: usize) -> Option<LineKind> {
        if line == 0 {
            return None;
        }
        self.kinds.get(line - 1).copied()
    }

    /// Line number of the instruction at `addr`, or `None` if `addr` is not
    /// the start of any assembled instruction.
    pub fn line_for_address(&self, addr: i64) -> Option<usize> {
        self.addr_to_line
            .binary_search_by_key(&addr, |&(a, _)| a)
            .ok()
            .map(|i| self.addr_to_line[i].1)
    }

    pub fn label_at_address(&self, addr: i64) -> Option<&str> {
        self.label_by_address.get(&addr).map(|s| s.as_str())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Text,
    Data,
}

struct Pass1 {
    tokenized: Vec<Option<Vec<String>>>,
    labels: HashMap<String, Label>,
    errors: Vec<AssembleError>,
}

fn is_valid_label(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Splits `label: rest` on the first colon. Returns `(None, s)` if there is
/// no colon.
fn split_label(s: &str) -> (Option<String>, String) {
    match s.find(':') {
        Some(idx) => (Some(s[..idx].trim().to_string()), s[idx + 1..].to_string()),
        None => (None, s.to_string()),
    }
}

fn data_width(directive: &str) -> Option<u32> {
    match directive {
        ".byte" => Some(8),
        ".half" => Some(16),
        ".word" => Some(32),
        ".dword" => Some(64),
        _ => None,
    }
}

fn pass1(source: &str, memory: &mut Memory) -> Pass1 {
    let mut mode = Mode::Text;
    let mut pc = TEXT_BASE;
    let mut mc = DATA_BASE;
    let mut labels = HashMap::new();
    let mut tokenized = Vec::new();
    let mut errors = Vec::new();

    for (idx, raw_line) in source.lines().enumerate() {
        let line_no = idx + 1;
        let formatted = format_line(raw_line);
        if formatted.is_empty() {
            tokenized.push(None);
            continue;
        }

        let words = split_words(&formatted);
        let first = words[0].as_str();

        if first == ".text" {
            mode = Mode::Text;
            tokenized.push(None);
            continue;
        }
        if first == ".data" {
            mode = Mode::Data;
            tokenized.push(None);
            continue;
        }

        if first.starts_with('.') {
            match (mode, data_width(first)) {
                (Mode::Data, Some(w)) => {
                    if words.len() < 2 {
                        errors.push(AssembleError {
                            line: line_no,
                            kind: ErrorKind::InvalidDataValue(formatted.clone()),
                        });
                    }
                    for tok in &words[1..] {
                        match parse_data(tok, w) {
                            Ok(v) => {
                                let _ = memory.store(v, mc, w);
                                mc += (w / 8) as i64;
                            }
                            Err(_) => errors.push(AssembleError {
                                line: line_no,
                                kind: ErrorKind::InvalidDataValue(tok.clone()),
                            }),
                        }
                    }
                }
                _ => errors.push(AssembleError {
                    line: line_no,
                    kind: ErrorKind::IllegalDirective(first.to_string()),
                }),
            }
            tokenized.push(None);
            continue;
        }

        if mode == Mode::Data {
            errors.push(AssembleError {
                line: line_no,
                kind: ErrorKind::IllegalDirective(formatted.clone()),
            });
            tokenized.push(None);
            continue;
        }

        let (label, rest) = split_label(&formatted);
        if let Some(name) = label {
            if is_valid_label(&name) {
                if labels.contains_key(&name) {
                    errors.push(AssembleError {
                        line: line_no,
                        kind: ErrorKind::DuplicateLabel(name),
                    });
                } else {
                    labels.insert(name, Label { address: pc, line: line_no });
                }
            } else {
                errors.push(AssembleError {
                    line: line_no,
                    kind: ErrorKind::InvalidLabel(name),
                });
            }
        }

        let rest_trimmed = rest.trim();
        if rest_trimmed.is_empty() {
            tokenized.push(None);
        } else {
            tokenized.push(Some(split_words(rest_trimmed)));
            pc += 4;
        }
    }

    Pass1 { tokenized, labels, errors }
}

fn is_identifier_like(tok: &str) -> bool {
    tok.chars()
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false)
}

fn resolve_target(tok: &str, pc: i64, width: u32, labels: &HashMap<String, Label>) -> Result<i64, ErrorKind> {
    if let Some(label) = labels.get(tok) {
        return Ok(label.address - pc);
    }
    match parse_signed(tok, width) {
        Ok(v) => Ok(v),
        Err(e) => {
            if is_identifier_like(tok) {
                Err(ErrorKind::LabelUndefined(tok.to_string()))
            } else {
                Err(numeric_err(e))
            }
        }
    }
}

/// Splits the `imm(rs1)` or `imm rs1` operand pair shared by loads, stores,
/// and `jalr`.
fn split_offset_reg(tokens: &[String]) -> Result<(String, String), ErrorKind> {
    match tokens {
        [combined] => {
            if let Some(open) = combined.find('(') {
                if combined.ends_with(')') {
                    let imm = combined[..open].to_string();
                    let reg = combined[open + 1..combined.len() - 1].to_string();
                    return Ok((imm, reg));
                }
            }
            Err(ErrorKind::WrongArity { expected: 2, found: 1 })
        }
        [imm, reg] => Ok((imm.clone(), reg.clone())),
        other => Err(ErrorKind::WrongArity { expected: 2, found: other.len() }),
    }
}

fn reg(tok: &str) -> Result<u8, ErrorKind> {
    registers::resolve(tok).map_err(|e| ErrorKind::InvalidRegister(e.0))
}

fn need(operands: &[String], expected: usize) -> Result<(), ErrorKind> {
    if operands.len() != expected {
        return Err(ErrorKind::WrongArity { expected, found: operands.len() });
    }
    Ok(())
}

/// Encodes one tokenized instruction line (mnemonic + operands, label
/// already stripped) into its 32-bit machine word.
fn encode_instruction(
    tokens: &[String],
    pc: i64,
    labels: &HashMap<String, Label>,
) -> Result<u32, ErrorKind> {
    let mnemonic = tokens[0].as_str();
    let operands = &tokens[1..];

    let instr = match mnemonic {
        "add" | "sub" | "sll" | "slt" | "sltu" | "xor" | "srl" | "sra" | "or" | "and" => {
            need(operands, 3)?;
            let rd = reg(&operands[0])?;
            let rs1 = reg(&operands[1])?;
            let rs2 = reg(&operands[2])?;
            match mnemonic {
                "add" => Instruction::Add { rd, rs1, rs2 },
                "sub" => Instruction::Sub { rd, rs1, rs2 },
                "sll" => Instruction::Sll { rd, rs1, rs2 },
                "slt" => Instruction::Slt { rd, rs1, rs2 },
                "sltu" => Instruction::Sltu { rd, rs1, rs2 },
                "xor" => Instruction::Xor { rd, rs1, rs2 },
                "srl" => Instruction::Srl { rd, rs1, rs2 },
                "sra" => Instruction::Sra { rd, rs1, rs2 },
                "or" => Instruction::Or { rd, rs1, rs2 },
                "and" => Instruction::And { rd, rs1, rs2 },
                _ => unreachable!(),
            }
        }

        "addi" | "slti" | "sltiu" | "xori" | "ori" | "andi" => {
            need(operands, 3)?;
            let rd = reg(&operands[0])?;
            let rs1 = reg(&operands[1])?;
            let imm = parse_signed(&operands[2], 12).map_err(numeric_err)?;
            match mnemonic {
                "addi" => Instruction::Addi { rd, rs1, imm },
                "slti" => Instruction::Slti { rd, rs1, imm },
                "sltiu" => Instruction::Sltiu { rd, rs1, imm },
                "xori" => Instruction::Xori { rd, rs1, imm },
                "ori" => Instruction::Ori { rd, rs1, imm },
                "andi" => Instruction::Andi { rd, rs1, imm },
                _ => unreachable!(),
            }
        }

        "slli" | "srli" | "srai" => {
            need(operands, 3)?;
            let rd = reg(&operands[0])?;
            let rs1 = reg(&operands[1])?;
            let shamt = parse_unsigned(&operands[2], 6).map_err(numeric_err)? as u32;
            match mnemonic {
                "slli" => Instruction::Slli { rd, rs1, shamt },
                "srli" => Instruction::Srli { rd, rs1, shamt },
                "srai" => Instruction::Srai { rd, rs1, shamt },
                _ => unreachable!(),
            }
        }

        "lb" | "lh" | "lw" | "ld" | "lbu" | "lhu" | "lwu" => {
            if operands.is_empty() {
                return Err(ErrorKind::WrongArity { expected: 3, found: 0 });
            }
            let rd = reg(&operands[0])?;
            let (imm_tok, rs1_tok) = split_offset_reg(&operands[1..])?;
            let rs1 = reg(&rs1_tok)?;
            let imm = parse_signed(&imm_tok, 12).map_err(numeric_err)?;
            match mnemonic {
                "lb" => Instruction::Lb { rd, rs1, imm },
                "lh" => Instruction::Lh { rd, rs1, imm },
                "lw" => Instruction::Lw { rd, rs1, imm },
                "ld" => Instruction::Ld { rd, rs1, imm },
                "lbu" => Instruction::Lbu { rd, rs1, imm },
                "lhu" => Instruction::Lhu { rd, rs1, imm },
                "lwu" => Instruction::Lwu { rd, rs1, imm },
                _ => unreachable!(),
            }
        }

        "sb" | "sh" | "sw" | "sd" => {
            if operands.is_empty() {
                return Err(ErrorKind::WrongArity { expected: 3, found: 0 });
            }
            let rs2 = reg(&operands[0])?;
            let (imm_tok, rs1_tok) = split_offset_reg(&operands[1..])?;
            let rs1 = reg(&rs1_tok)?;
            let imm = parse_signed(&imm_tok, 12).map_err(numeric_err)?;
            match mnemonic {
                "sb" => Instruction::Sb { rs1, rs2, imm },
                "sh" => Instruction::Sh { rs1, rs2, imm },
                "sw" => Instruction::Sw { rs1, rs2, imm },
                "sd" => Instruction::Sd { rs1, rs2, imm },
                _ => unreachable!(),
            }
        }

        "beq" | "bne" | "blt" | "bge" | "bltu" | "bgeu" => {
            need(operands, 3)?;
            let rs1 = reg(&operands[0])?;
            let rs2 = reg(&operands[1])?;
            let offset = resolve_target(&operands[2], pc, 13, labels)?;
            match mnemonic {
                "beq" => Instruction::Beq { rs1, rs2, offset },
                "bne" => Instruction::Bne { rs1, rs2, offset },
                "blt" => Instruction::Blt { rs1, rs2, offset },
                "bge" => Instruction::Bge { rs1, rs2, offset },
                "bltu" => Instruction::Bltu { rs1, rs2, offset },
                "bgeu" => Instruction::Bgeu { rs1, rs2, offset },
                _ => unreachable!(),
            }
        }

        "jal" => {
            need(operands, 2)?;
            let rd = reg(&operands[0])?;
            let offset = resolve_target(&operands[1], pc, 21, labels)?;
            Instruction::Jal { rd, offset }
        }

        "jalr" => {
            if operands.is_empty() {
                return Err(ErrorKind::WrongArity { expected: 3, found: 0 });
            }
            let rd = reg(&operands[0])?;
            let (imm_tok, rs1_tok) = split_offset_reg(&operands[1..])?;
            let rs1 = reg(&rs1_tok)?;
            let imm = parse_signed(&imm_tok, 12).map_err(numeric_err)?;
            Instruction::Jalr { rd, rs1, imm }
        }

        "lui" => {
            need(operands, 2)?;
            let rd = reg(&operands[0])?;
            let imm = parse_unsigned(&operands[1], 20).map_err(numeric_err)? as i64;
            Instruction::Lui { rd, imm }
        }

        "auipc" => {
            need(operands, 2)?;
            let rd = reg(&operands[0])?;
            let imm = parse_unsigned(&operands[1], 20).map_err(numeric_err)? as i64;
            Instruction::Auipc { rd, imm }
        }

        other => return Err(ErrorKind::UnknownInstruction(other.to_string())),
    };

    Ok(instr.encode())
}

fn store_instructions(
    tokenized: &[Option<Vec<String>>],
    labels: &HashMap<String, Label>,
    memory: &mut Memory,
) -> (Vec<LineKind>, Vec<(i64, usize)>, Vec<AssembleError>) {
    let mut kinds = Vec::with_capacity(tokenized.len());
    let mut addr_to_line = Vec::new();
    let mut errors = Vec::new();
    let mut pc = TEXT_BASE;

    for (idx, entry) in tokenized.iter().enumerate() {
        let line_no = idx + 1;
        match entry {
            None => kinds.push(LineKind::Empty),
            Some(tokens) => {
                kinds.push(LineKind::Instruction);
                match encode_instruction(tokens, pc, labels) {
                    Ok(word) => {
                        let _ = memory.store(word as i64, pc, 32);
                        addr_to_line.push((pc, line_no));
                    }
                    Err(kind) => errors.push(AssembleError { line: line_no, kind }),
                }
                pc += 4;
            }
        }
    }

    (kinds, addr_to_line, errors)
}

/// Assembles `source` into `memory`, writing data-section bytes during pass
/// 1 and instruction words during pass 2. On any failure, no partial
/// `Program` is returned: the caller (`Simulator::load`) marks the program
/// "not loaded" per §7.
pub fn assemble(source: &str, memory: &mut Memory) -> Result<Program, Vec<AssembleError>> {
    let p1 = pass1(source, memory);
    let (kinds, addr_to_line, pass2_errors) = store_instructions(&p1.tokenized, &p1.labels, memory);

    let mut errors = p1.errors;
    errors.extend(pass2_errors);

    if !errors.is_empty() {
        errors.sort_by_key(|e| e.line);
        return Err(errors);
    }

    let label_by_address = p1.labels.iter().map(|(name, l)| (l.address, name.clone())).collect();

    Ok(Program {
        kinds,
        labels: p1.labels,
        addr_to_line,
        label_by_address,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assemble_str(src: &str) -> (Program, Memory) {
        let mut mem = Memory::new();
        let program = assemble(src, &mut mem).expect("assembles");
        (program, mem)
    }

    #[test]
    fn s1_addition_assembles_three_instructions() {
        let (program, mem) = assemble_str("addi x5, x0, 7\naddi x6, x0, 35\nadd x7, x5, x6\n");
        assert_eq!(program.line_count(), 3);
        assert_eq!(program.line_for_address(0), Some(1));
        assert_eq!(program.line_for_address(8), Some(3));
        assert_eq!(mem.load(0, 32, false).unwrap(), Instruction::Addi { rd: 5, rs1: 0, imm: 7 }.encode() as i64);
    }

    #[test]
    fn labels_resolve_to_branch_offsets() {
        let src = "addi x1, x0, 1\nbeq x1, x1, L\naddi x2, x0, 99\nL: addi x3, x0, 5\n";
        let (program, mem) = assemble_str(src);
        assert_eq!(program.labels.get("L").unwrap().address, 12);
        let word = mem.load(4, 32, false).unwrap() as u32;
        let decoded = Instruction::decode(word).unwrap();
        assert_eq!(decoded, Instruction::Beq { rs1: 1, rs2: 1, offset: 8 });
    }

    #[test]
    fn data_section_writes_little_endian_bytes() {
        let src = ".data\n.word 0xdeadbeef\n.text\naddi x1, x0, 1\n";
        let (_program, mem) = assemble_str(src);
        assert_eq!(mem.load(0x10000, 32, false).unwrap() as u32, 0xdeadbeef);
    }

    #[test]
    fn duplicate_label_is_an_error() {
        let mut mem = Memory::new();
        let err = assemble("a: addi x1, x0, 1\na: addi x2, x0, 2\n", &mut mem).unwrap_err();
        assert!(err.iter().any(|e| matches!(e.kind, ErrorKind::DuplicateLabel(_))));
    }

    #[test]
    fn unknown_mnemonic_is_an_error() {
        let mut mem = Memory::new();
        let err = assemble("frobnicate x1, x2, x3\n", &mut mem).unwrap_err();
        assert_eq!(err[0].kind, ErrorKind::UnknownInstruction("frobnicate".to_string()));
    }

    #[test]
    fn illegal_directive_outside_data_mode_is_rejected() {
        let mut mem = Memory::new();
        let err = assemble(".bogus 1\n", &mut mem).unwrap_err();
        assert!(matches!(err[0].kind, ErrorKind::IllegalDirective(_)));
    }

    #[test]
    fn load_store_parenthesized_and_comma_forms_are_equivalent() {
        let (p1, m1) = assemble_str("lw x5, 4(x0)\n");
        let (p2, m2) = assemble_str("lw x5, 4, x0\n");
        let _ = (p1, p2);
        assert_eq!(m1.load(0, 32, false).unwrap(), m2.load(0, 32, false).unwrap());
    }
}
