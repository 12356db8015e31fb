//! Assembling MIPS source into memory.
//!
//! This module is the two-pass assembler driver. The first pass walks each
//! file's token lines: it defines labels, processes directives (writing data
//! segment contents immediately), expands macros, and parses instruction
//! statements into an address-keyed map. Between passes, `.globl` symbols are
//! promoted and forward references from data directives are patched. The
//! second pass resolves each parsed statement's operands against the symbol
//! tables, expands pseudo-instructions through their templates, encodes the
//! machine words, and stores the finished [`BasicStatement`]s into memory.
//!
//! The assembler module notably consists of:
//! - [`assemble`]: the entry point producing an [`AssembledProgram`].
//! - [`Segment`]: a named address range with an emission cursor.
//! - [`directives`]: the directive processor.
//! - [`macros`]: macro definition and expansion.
//! - [`symbols`]: symbol tables and forward-reference patches.

pub mod directives;
pub mod macros;
pub mod symbols;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::bits;
use crate::err::{Diagnostic, ErrorList};
use crate::isa::pseudo::{self, ExpansionContext};
use crate::isa::{
    BasicInstruction, BasicStatement, Instruction, InstructionFormat, InstructionSet, OperandType,
    StatementSource,
};
use crate::parse::lex::{self, Token, TokenKind};
use crate::parse::{SourceFile, SourceLine};
use crate::sim::mem::Memory;

use self::directives::Directive;
use self::macros::{MacroDefinition, MacroTable};
use self::symbols::{ForwardReferencePatch, SymbolTable};

/// Flags that select assembler behavior.
#[derive(Debug, Clone, Copy)]
pub struct AssemblerFlags {
    /// Whether extended (pseudo) instructions are permitted.
    pub extended_mode: bool,
    /// Whether delayed branching is enabled (affects pseudo-expansion sizes).
    pub delayed_branching: bool,
    /// Whether warnings fail the build.
    pub warnings_are_errors: bool,
}

impl Default for AssemblerFlags {
    fn default() -> Self {
        Self { extended_mode: true, delayed_branching: false, warnings_are_errors: false }
    }
}

/// Which of the five segments is selected for emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentId {
    /// User text.
    Text,
    /// User data.
    Data,
    /// Kernel text.
    KernelText,
    /// Kernel data.
    KernelData,
    /// The `.extern` segment.
    Extern,
}

/// A segment: a contiguous address range with an emission cursor.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Whether this is a data segment (false for text).
    pub is_data: bool,
    /// Lowest address of the segment.
    pub first_address: u32,
    /// Highest address of the segment.
    pub last_address: u32,
    /// The emission cursor.
    pub address: u32,
}

impl Segment {
    fn new(is_data: bool, first_address: u32, last_address: u32) -> Self {
        Self { is_data, first_address, last_address, address: first_address }
    }

    /// Advances the cursor by `bytes`.
    pub fn increment(&mut self, bytes: u32) {
        self.address = self.address.wrapping_add(bytes);
    }

    /// Whether the cursor still lies within the segment's range.
    pub fn in_range(&self) -> bool {
        (self.first_address..=self.last_address).contains(&self.address)
    }
}

/// One operand as parsed from a statement's token list.
#[derive(Debug, Clone)]
pub enum OperandNode {
    /// A general-purpose register.
    Register(u8, Token),
    /// A floating-point register.
    FpRegister(u8, Token),
    /// An integer literal (narrowest kind recorded on the token).
    Integer(i32, Token),
    /// A label reference, with an optional `label+offset` displacement.
    Label {
        /// The label's identifier.
        name: String,
        /// Displacement folded from `label+n` / `label-n` syntax.
        offset: i32,
        /// The identifier token, for diagnostics.
        token: Token,
    },
    /// A base register in parentheses.
    ParenRegister(u8, Token),
}

impl OperandNode {
    /// The matching cost of this operand against a declared type, or `None`
    /// if they are incompatible. Exact kinds cost 0; widening an integer
    /// literal into a wider slot costs the number of widening steps.
    fn cost_against(&self, ty: OperandType) -> Option<u32> {
        match (self, ty) {
            (OperandNode::Register(..), OperandType::Register) => Some(0),
            (OperandNode::FpRegister(..), OperandType::FpRegister) => Some(0),
            (OperandNode::ParenRegister(..), OperandType::ParenRegister) => Some(0),
            (OperandNode::Label { .. }, OperandType::Label) => Some(0),
            // Raw integers are accepted where a label is expected (branch
            // offsets and jump targets), at a slight penalty.
            (OperandNode::Integer(..), OperandType::Label) => Some(1),
            (OperandNode::Integer(value, _), ty) if ty.is_integer() => {
                if !ty.fits(*value) {
                    return None;
                }
                let narrowest = [
                    OperandType::Integer3Unsigned,
                    OperandType::Integer5Unsigned,
                    OperandType::Integer16Signed,
                    OperandType::Integer16Unsigned,
                    OperandType::Integer32,
                ]
                .into_iter()
                .filter(|t| t.fits(*value))
                .map(|t| t.widening_rank().unwrap())
                .min()
                .unwrap();
                Some(ty.widening_rank().unwrap().saturating_sub(narrowest))
            }
            _ => None,
        }
    }
}

/// A first-pass statement: its source, the matched instruction, its parsed
/// operands, and the address it will occupy.
#[derive(Debug, Clone)]
pub struct ParsedStatement {
    /// The originating source line.
    pub line: SourceLine,
    /// The statement's operator token.
    pub first_token: Token,
    /// The instruction selected by operand matching.
    pub instruction: &'static Instruction,
    /// The parsed operand syntax nodes.
    pub operands: Vec<OperandNode>,
    /// The address the statement will be emitted at.
    pub address: u32,
    /// The statement's size in bytes (4, or the pseudo-expansion size).
    pub size_bytes: u32,
}

/// The result of a successful assembly.
#[derive(Debug)]
pub struct AssembledProgram {
    /// Every emitted statement, keyed by address.
    pub statements: BTreeMap<u32, Arc<BasicStatement>>,
    /// The global symbol table (`.globl` and `.extern` symbols).
    pub globals: SymbolTable,
    /// The address execution should start at: the global `main` if defined,
    /// otherwise the base of the text segment.
    pub entry_point: u32,
}

/// Assembles tokenized source files into `memory`.
///
/// Memory is reset first, so the resulting image is determined solely by the
/// sources and flags. On failure the accumulated diagnostics are returned;
/// the caller decides how to surface them.
pub fn assemble(
    files: &[SourceFile],
    memory: &mut Memory,
    flags: AssemblerFlags,
) -> Result<AssembledProgram, ErrorList> {
    Assembler::new(memory, flags).run(files, memory)
}

pub(crate) struct Assembler {
    pub(crate) registry: &'static InstructionSet,
    pub(crate) flags: AssemblerFlags,
    pub(crate) errors: ErrorList,

    pub(crate) text_segment: Segment,
    pub(crate) data_segment: Segment,
    pub(crate) ktext_segment: Segment,
    pub(crate) kdata_segment: Segment,
    pub(crate) extern_segment: Segment,
    pub(crate) active: SegmentId,
    pub(crate) auto_align: bool,
    pub(crate) compact: bool,

    pub(crate) global_symbols: SymbolTable,
    pub(crate) local_symbols: SymbolTable,
    pub(crate) globalize: HashMap<String, Token>,
    pub(crate) current_file_patches: Vec<ForwardReferencePatch>,
    pub(crate) remaining_patches: Vec<ForwardReferencePatch>,

    pub(crate) macro_table: MacroTable,
    pub(crate) macro_call_stack: Vec<String>,
    pub(crate) macro_collector: Option<MacroCollector>,

    pub(crate) parsed: BTreeMap<u32, ParsedStatement>,
}

/// A macro definition in progress (between `.macro` and `.end_macro`).
pub(crate) struct MacroCollector {
    pub(crate) name: Token,
    pub(crate) parameters: Vec<String>,
    pub(crate) body: Vec<SourceLine>,
}

impl Assembler {
    fn new(memory: &Memory, flags: AssemblerFlags) -> Self {
        let config = memory.config();
        Self {
            registry: InstructionSet::global(),
            flags,
            errors: ErrorList::new(),
            text_segment: Segment::new(false, config.text_low, config.text_high),
            data_segment: Segment::new(true, config.data_low, config.data_high),
            ktext_segment: Segment::new(false, config.ktext_low, config.ktext_high),
            kdata_segment: Segment::new(true, config.kdata_low, config.kdata_high),
            extern_segment: Segment::new(true, config.extern_low, config.extern_high),
            active: SegmentId::Text,
            auto_align: true,
            compact: config.is_using_compact_address_space(),
            global_symbols: SymbolTable::new("(global)"),
            local_symbols: SymbolTable::new("(none)"),
            globalize: HashMap::new(),
            current_file_patches: Vec::new(),
            remaining_patches: Vec::new(),
            macro_table: MacroTable::new(),
            macro_call_stack: Vec::new(),
            macro_collector: None,
            parsed: BTreeMap::new(),
        }
    }

    pub(crate) fn segment(&self) -> &Segment {
        match self.active {
            SegmentId::Text => &self.text_segment,
            SegmentId::Data => &self.data_segment,
            SegmentId::KernelText => &self.ktext_segment,
            SegmentId::KernelData => &self.kdata_segment,
            SegmentId::Extern => &self.extern_segment,
        }
    }

    pub(crate) fn segment_mut(&mut self) -> &mut Segment {
        match self.active {
            SegmentId::Text => &mut self.text_segment,
            SegmentId::Data => &mut self.data_segment,
            SegmentId::KernelText => &mut self.ktext_segment,
            SegmentId::KernelData => &mut self.kdata_segment,
            SegmentId::Extern => &mut self.extern_segment,
        }
    }

    pub(crate) fn set_active_segment(&mut self, id: SegmentId) {
        self.active = id;
        self.auto_align = true;
    }

    fn run(mut self, files: &[SourceFile], memory: &mut Memory) -> Result<AssembledProgram, ErrorList> {
        memory.reset();

        // FIRST PASS: symbols, directives, macro expansion, statement sizing.
        for file in files {
            if self.errors.has_exceeded_limit() {
                break;
            }
            log::debug!("first pass over {}", file.filename);
            self.local_symbols = SymbolTable::new(file.filename.to_string());
            self.globalize.clear();

            for line in &file.lines {
                if self.errors.has_exceeded_limit() {
                    break;
                }
                self.process_line(line, memory);
            }

            if let Some(collector) = self.macro_collector.take() {
                self.errors.add(Diagnostic::error(
                    collector.name.location.clone(),
                    "Macro definition is missing its .end_macro",
                ));
            }

            self.transfer_globals();

            // Resolve this file's forward references locally first, then
            // globally; survivors wait for the remaining files.
            let patches = std::mem::take(&mut self.current_file_patches);
            for patch in patches {
                let resolved = patch
                    .resolve(&self.local_symbols)
                    .or_else(|| patch.resolve(&self.global_symbols));
                match resolved {
                    Some(value) => self.apply_patch(&patch, value, memory),
                    None => self.remaining_patches.push(patch),
                }
            }
        }

        // Whatever is still unresolved is either a global defined in a later
        // file (now known) or undefined.
        let patches = std::mem::take(&mut self.remaining_patches);
        for patch in patches {
            match patch.resolve(&self.global_symbols) {
                Some(value) => self.apply_patch(&patch, value, memory),
                None => self.errors.add(Diagnostic::error(
                    patch.identifier.location.clone(),
                    format!("Undefined symbol '{}'", patch.identifier.literal),
                )),
            }
        }

        if self.errors.is_fatal(self.flags.warnings_are_errors) {
            return Err(self.errors);
        }

        // SECOND PASS: operand resolution, pseudo expansion, encoding.
        let parsed = std::mem::take(&mut self.parsed);
        let mut statements: BTreeMap<u32, Arc<BasicStatement>> = BTreeMap::new();
        for (address, statement) in &parsed {
            if self.errors.has_exceeded_limit() {
                break;
            }
            self.emit_statement(*address, statement, memory, &mut statements);
        }

        if self.errors.is_fatal(self.flags.warnings_are_errors) {
            return Err(self.errors);
        }

        for diagnostic in self.errors.iter() {
            log::warn!("{diagnostic}");
        }

        let entry_point = self
            .global_symbols
            .get("main")
            .map(|symbol| symbol.address)
            .unwrap_or(memory.config().text_low);

        Ok(AssembledProgram { statements, globals: self.global_symbols, entry_point })
    }

    // ------------------------------------------------------------------
    // First pass.
    // ------------------------------------------------------------------

    pub(crate) fn process_line(&mut self, line: &SourceLine, memory: &mut Memory) {
        let tokens = line.significant_tokens();
        if tokens.is_empty() {
            return;
        }

        // Inside a macro definition, lines are collected verbatim.
        if self.macro_collector.is_some() {
            if tokens[0].kind == TokenKind::Directive(Directive::EndMacro) {
                let collector = self.macro_collector.take().unwrap();
                self.macro_table.define(MacroDefinition {
                    name: collector.name,
                    parameters: collector.parameters,
                    body: collector.body,
                });
            } else {
                let mut collected = line.clone();
                collected.tokens = tokens.to_vec();
                self.macro_collector.as_mut().unwrap().body.push(collected);
            }
            return;
        }

        // Labels: IDENTIFIER (or shadowing OPERATOR) followed by a colon.
        let mut index = 0;
        while index + 1 < tokens.len()
            && matches!(tokens[index].kind, TokenKind::Identifier | TokenKind::Operator)
            && tokens[index + 1].kind == TokenKind::Colon
        {
            self.define_label(&tokens[index]);
            index += 2;
        }

        let rest = &tokens[index..];
        let Some(first) = rest.first() else { return };

        match &first.kind {
            TokenKind::Directive(directive) => {
                self.process_directive(*directive, rest, memory);
            }
            TokenKind::Operator => self.process_statement(rest, line),
            TokenKind::Identifier if self.macro_table.has_name(&first.literal) => {
                self.process_macro_call(rest, memory);
            }
            TokenKind::Identifier => {
                self.errors.add(Diagnostic::error(
                    first.location.clone(),
                    format!("'{}' is not a recognized instruction, directive, or macro", first.literal),
                ));
            }
            _ => {
                self.errors.add(Diagnostic::error(
                    first.location.clone(),
                    format!("Unexpected token '{}' at start of statement", first.literal),
                ));
            }
        }
    }

    fn define_label(&mut self, token: &Token) {
        let segment = self.segment();
        let address = segment.address;
        let is_data = segment.is_data;
        if self.local_symbols.get(&token.literal).is_some() {
            self.errors.add(Diagnostic::error(
                token.location.clone(),
                format!("Symbol '{}' is already defined in this file", token.literal),
            ));
            return;
        }
        self.local_symbols.define(token.literal.clone(), address, is_data);
    }

    /// Looks a symbol up local-first, then global.
    pub(crate) fn lookup_symbol(&self, identifier: &str) -> Option<&symbols::Symbol> {
        self.local_symbols.get(identifier).or_else(|| self.global_symbols.get(identifier))
    }

    fn process_macro_call(&mut self, tokens: &[Token], memory: &mut Memory) {
        let name = &tokens[0];
        // SPIM-style parenthesized argument lists are accepted; strip the
        // parens along with the commas.
        let mut arguments: Vec<Token> = tokens[1..]
            .iter()
            .filter(|t| t.kind != TokenKind::Delimiter)
            .cloned()
            .collect();
        if arguments.len() >= 2
            && arguments.first().is_some_and(|t| t.kind == TokenKind::LeftParen)
            && arguments.last().is_some_and(|t| t.kind == TokenKind::RightParen)
        {
            arguments.remove(0);
            arguments.pop();
        }

        let Some(definition) = self.macro_table.get(&name.literal, arguments.len()).cloned() else {
            self.errors.add(Diagnostic::error(
                name.location.clone(),
                format!(
                    "Macro '{}' is not defined with {} argument(s)",
                    name.literal,
                    arguments.len()
                ),
            ));
            return;
        };

        if self.macro_call_stack.contains(&name.literal) {
            self.errors.add(Diagnostic::error(
                name.location.clone(),
                format!("Recursive call to macro '{}'", name.literal),
            ));
            return;
        }

        let counter = self.macro_table.next_counter();
        let expanded = definition.expand(&arguments, counter);
        self.macro_call_stack.push(name.literal.clone());
        for expanded_line in &expanded {
            self.process_line(expanded_line, memory);
        }
        self.macro_call_stack.pop();
    }

    fn process_statement(&mut self, tokens: &[Token], line: &SourceLine) {
        let first = &tokens[0];
        if self.segment().is_data {
            self.errors.add(Diagnostic::error(
                first.location.clone(),
                "Instructions may only appear in a text segment",
            ));
            return;
        }

        let operands = match parse_operand_nodes(&tokens[1..]) {
            Ok(operands) => operands,
            Err(diagnostic) => {
                self.errors.add(diagnostic);
                return;
            }
        };

        let Some(instruction) = self.match_instruction(&first.literal, &operands) else {
            let examples: Vec<&str> = self
                .registry
                .match_mnemonic(&first.literal)
                .iter()
                .map(|i| i.example())
                .collect();
            self.errors.add(Diagnostic::error(
                first.location.clone(),
                format!(
                    "Operands of '{}' do not match any instruction template; expected one of: {}",
                    first.literal,
                    examples.join("; ")
                ),
            ));
            return;
        };

        let size_bytes = instruction.size_bytes(self.flags.delayed_branching, self.compact);
        let address = self.segment().address;

        let statement = ParsedStatement {
            line: line.clone(),
            first_token: first.clone(),
            instruction,
            operands,
            address,
            size_bytes,
        };

        if let Some(previous) = self.parsed.insert(address, statement) {
            self.errors.add(Diagnostic::error(
                first.location.clone(),
                format!(
                    "Attempted to place the statement at address {}, but a statement was already placed there from {}, line {}",
                    bits::to_hex_string(address as i32),
                    previous.line.filename,
                    previous.line.line_index + 1
                ),
            ));
        }
        if !self.segment().in_range() {
            self.errors.add(Diagnostic::error(
                first.location.clone(),
                format!("Statement address {} is outside the text segment", bits::to_hex_string(address as i32)),
            ));
        }
        self.segment_mut().increment(size_bytes);
    }

    /// Selects the lowest-cost instruction among the declarations sharing the
    /// mnemonic, honoring the extended-mode flag. Ties go to the earlier
    /// declaration.
    fn match_instruction(
        &self,
        mnemonic: &str,
        operands: &[OperandNode],
    ) -> Option<&'static Instruction> {
        let registry: &'static InstructionSet = self.registry;
        let mut best: Option<(u32, &'static Instruction)> = None;
        for instruction in registry.match_mnemonic(mnemonic) {
            if !self.flags.extended_mode && matches!(instruction, Instruction::Extended(_)) {
                continue;
            }
            let types = instruction.operand_types();
            if types.len() != operands.len() {
                continue;
            }
            let cost: Option<u32> = operands
                .iter()
                .zip(types)
                .map(|(node, ty)| node.cost_against(*ty))
                .sum();
            if let Some(cost) = cost {
                if best.is_none() || cost < best.unwrap().0 {
                    best = Some((cost, instruction));
                }
            }
        }
        best.map(|(_, instruction)| instruction)
    }

    fn transfer_globals(&mut self) {
        let globalize = std::mem::take(&mut self.globalize);
        for (identifier, token) in globalize {
            match self.local_symbols.remove(&identifier) {
                None => self.errors.add(Diagnostic::error(
                    token.location.clone(),
                    format!("Symbol '{identifier}' declared .globl but not defined in this file"),
                )),
                Some(symbol) => {
                    if self.global_symbols.get(&identifier).is_some() {
                        self.errors.add(Diagnostic::error(
                            token.location.clone(),
                            format!("Symbol '{identifier}' was declared global in another file"),
                        ));
                        // Keep it local so later references still resolve.
                        self.local_symbols.insert(symbol);
                    } else {
                        self.global_symbols.insert(symbol);
                    }
                }
            }
        }
    }

    fn apply_patch(&mut self, patch: &ForwardReferencePatch, value: u32, memory: &mut Memory) {
        if let Err(error) =
            memory.store_sized(patch.address, value as i32, patch.length, false)
        {
            self.errors.add(Diagnostic::error(
                patch.identifier.location.clone(),
                format!("Could not patch forward reference: {error}"),
            ));
        }
    }

    // ------------------------------------------------------------------
    // Second pass.
    // ------------------------------------------------------------------

    fn emit_statement(
        &mut self,
        address: u32,
        statement: &ParsedStatement,
        memory: &mut Memory,
        output: &mut BTreeMap<u32, Arc<BasicStatement>>,
    ) {
        match statement.instruction {
            Instruction::Basic(basic) => {
                let Some(operands) = self.resolve_basic_operands(basic, statement, address) else {
                    return;
                };
                self.store_basic(basic, operands, address, statement, memory, output);
            }
            Instruction::Extended(extended) => {
                // Pseudo operands resolve to raw values (labels become
                // absolute addresses); the template markers do the rest.
                let Some(values) = self.resolve_raw_operands(statement) else { return };
                let template = extended.template(self.compact);
                let mut line_address = address;
                for template_line in template {
                    let ctx = ExpansionContext {
                        operands: &values,
                        operand_types: &extended.operand_types,
                        line_address,
                        delayed_branching: self.flags.delayed_branching,
                    };
                    let Some(expanded) = pseudo::substitute(template_line, &ctx) else {
                        continue;
                    };
                    self.emit_template_line(&expanded, line_address, statement, memory, output);
                    line_address += 4;
                }
            }
        }
    }

    /// Assembles one substituted template line as a basic statement.
    fn emit_template_line(
        &mut self,
        text: &str,
        address: u32,
        origin: &ParsedStatement,
        memory: &mut Memory,
        output: &mut BTreeMap<u32, Arc<BasicStatement>>,
    ) {
        let (tokens, diagnostics) = lex::tokenize_line(
            &origin.line.filename,
            origin.line.line_index,
            text,
            self.registry,
        );
        debug_assert!(diagnostics.is_empty(), "template line {text:?} failed to tokenize");

        let operands = match parse_operand_nodes(&tokens[1..]) {
            Ok(operands) => operands,
            Err(diagnostic) => {
                self.errors.add(diagnostic);
                return;
            }
        };
        let matched = self.match_instruction(&tokens[0].literal, &operands);
        let Some(Instruction::Basic(basic)) = matched else {
            self.errors.add(Diagnostic::error(
                origin.first_token.location.clone(),
                format!("Pseudo-instruction expansion '{text}' does not match a basic instruction"),
            ));
            return;
        };
        let synthetic = ParsedStatement {
            line: origin.line.clone(),
            first_token: origin.first_token.clone(),
            instruction: matched.unwrap(),
            operands,
            address,
            size_bytes: 4,
        };
        let Some(values) = self.resolve_basic_operands(basic, &synthetic, address) else {
            return;
        };
        self.store_basic(basic, values, address, origin, memory, output);
    }

    fn store_basic(
        &mut self,
        basic: &'static BasicInstruction,
        operands: Vec<i32>,
        address: u32,
        origin: &ParsedStatement,
        memory: &mut Memory,
        output: &mut BTreeMap<u32, Arc<BasicStatement>>,
    ) {
        let binary = basic.encoding.encode(&operands);
        let statement = Arc::new(BasicStatement {
            instruction: basic,
            operands,
            binary,
            address,
            source: Some(StatementSource {
                location: origin.first_token.location.clone(),
                line: origin.line.processed.clone().unwrap_or_else(|| origin.line.content.clone()),
            }),
        });
        match memory.store_statement(address, Arc::clone(&statement), false) {
            Ok(()) => {
                output.insert(address, statement);
            }
            Err(error) => self.errors.add(Diagnostic::error(
                origin.first_token.location.clone(),
                format!("Invalid address for text segment: {error}"),
            )),
        }
    }

    /// Resolves operand nodes for a basic instruction into encodable values.
    /// Label operands become branch offsets, jump fields, or absolute
    /// addresses depending on the instruction format.
    fn resolve_basic_operands(
        &mut self,
        basic: &BasicInstruction,
        statement: &ParsedStatement,
        address: u32,
    ) -> Option<Vec<i32>> {
        let mut values = Vec::with_capacity(statement.operands.len());
        for node in &statement.operands {
            let value = match node {
                OperandNode::Register(n, _)
                | OperandNode::FpRegister(n, _)
                | OperandNode::ParenRegister(n, _) => i32::from(*n),
                OperandNode::Integer(value, _) => match basic.format {
                    // A raw integer jump target is an address.
                    InstructionFormat::J => ((*value as u32) >> 2) as i32,
                    _ => *value,
                },
                OperandNode::Label { name, offset, token } => {
                    let Some(symbol) = self.lookup_symbol(name) else {
                        self.errors.add(Diagnostic::error(
                            token.location.clone(),
                            format!("Undefined symbol '{name}'"),
                        ));
                        return None;
                    };
                    let target = symbol.address.wrapping_add(*offset as u32);
                    match basic.format {
                        InstructionFormat::IBranch => {
                            let branch_offset =
                                (i64::from(target) - i64::from(address) - 4) >> 2;
                            if !(i64::from(i16::MIN)..=i64::from(i16::MAX)).contains(&branch_offset)
                            {
                                self.errors.add(Diagnostic::error(
                                    token.location.clone(),
                                    format!("Branch target '{name}' is out of range"),
                                ));
                                return None;
                            }
                            branch_offset as i32
                        }
                        InstructionFormat::J => (target >> 2) as i32,
                        _ => target as i32,
                    }
                }
            };
            values.push(value);
        }
        Some(values)
    }

    /// Resolves operand nodes to raw values for template expansion: labels
    /// become absolute addresses.
    fn resolve_raw_operands(&mut self, statement: &ParsedStatement) -> Option<Vec<i32>> {
        let mut values = Vec::with_capacity(statement.operands.len());
        for node in &statement.operands {
            let value = match node {
                OperandNode::Register(n, _)
                | OperandNode::FpRegister(n, _)
                | OperandNode::ParenRegister(n, _) => i32::from(*n),
                OperandNode::Integer(value, _) => *value,
                OperandNode::Label { name, offset, token } => {
                    let Some(symbol) = self.lookup_symbol(name) else {
                        self.errors.add(Diagnostic::error(
                            token.location.clone(),
                            format!("Undefined symbol '{name}'"),
                        ));
                        return None;
                    };
                    symbol.address.wrapping_add(*offset as u32) as i32
                }
            };
            values.push(value);
        }
        Some(values)
    }
}

/// Parses a statement's operand tokens into syntax nodes.
pub(crate) fn parse_operand_nodes(tokens: &[Token]) -> Result<Vec<OperandNode>, Diagnostic> {
    let mut nodes = Vec::new();
    let mut iter = tokens.iter().peekable();
    while let Some(token) = iter.next() {
        match &token.kind {
            TokenKind::Delimiter => continue,
            TokenKind::RegisterName(n) | TokenKind::RegisterNumber(n) => {
                nodes.push(OperandNode::Register(*n, token.clone()));
            }
            TokenKind::FpRegisterName(n) => {
                nodes.push(OperandNode::FpRegister(*n, token.clone()));
            }
            kind if kind.is_integer() => {
                nodes.push(OperandNode::Integer(token.integer_value().unwrap(), token.clone()));
            }
            // A mnemonic in operand position is a reference to a label that
            // shadows the instruction name.
            TokenKind::Identifier | TokenKind::Operator => {
                let mut offset = 0i32;
                // label+n / label-n displacements fold into the operand.
                if let Some(sign) = iter
                    .peek()
                    .filter(|t| matches!(t.kind, TokenKind::Plus | TokenKind::Minus))
                    .map(|t| t.kind.clone())
                {
                    iter.next();
                    match iter.next().and_then(|t| t.integer_value()) {
                        Some(value) => {
                            offset = if sign == TokenKind::Minus { -value } else { value };
                        }
                        None => {
                            return Err(Diagnostic::error(
                                token.location.clone(),
                                "Expected integer after '+' or '-' in label offset",
                            ));
                        }
                    }
                }
                nodes.push(OperandNode::Label {
                    name: token.literal.clone(),
                    offset,
                    token: token.clone(),
                });
            }
            TokenKind::LeftParen => {
                let register = iter.next();
                let close = iter.next();
                match (register, close) {
                    (Some(reg_token), Some(close_token))
                        if close_token.kind == TokenKind::RightParen =>
                    {
                        match reg_token.kind {
                            TokenKind::RegisterName(n) | TokenKind::RegisterNumber(n) => {
                                nodes.push(OperandNode::ParenRegister(n, reg_token.clone()));
                            }
                            _ => {
                                return Err(Diagnostic::error(
                                    reg_token.location.clone(),
                                    "Expected register inside parentheses",
                                ));
                            }
                        }
                    }
                    _ => {
                        return Err(Diagnostic::error(
                            token.location.clone(),
                            "Unclosed parenthesized register",
                        ));
                    }
                }
            }
            _ => {
                return Err(Diagnostic::error(
                    token.location.clone(),
                    format!("Unexpected token '{}' in operand list", token.literal),
                ));
            }
        }
    }
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::tokenize_source;
    use crate::sim::mem::MemoryConfiguration;

    pub(crate) fn assemble_text(source: &str) -> Result<(Memory, AssembledProgram), ErrorList> {
        assemble_text_with(source, AssemblerFlags::default(), MemoryConfiguration::default_layout())
    }

    pub(crate) fn assemble_text_with(
        source: &str,
        flags: AssemblerFlags,
        config: MemoryConfiguration,
    ) -> Result<(Memory, AssembledProgram), ErrorList> {
        let mut errors = ErrorList::new();
        let file = tokenize_source("test.asm", source, &mut errors);
        if errors.errors_occurred() {
            return Err(errors);
        }
        let mut memory = Memory::new(config);
        let program = assemble(&[file], &mut memory, flags)?;
        Ok((memory, program))
    }

    #[test]
    fn test_basic_statement_emission() {
        let (mut memory, program) = assemble_text(".text\nadd $t1, $t2, $t3\n").unwrap();
        assert_eq!(program.statements.len(), 1);
        let statement = &program.statements[&0x0040_0000];
        assert_eq!(statement.binary, 0x014b_4820);
        assert_eq!(memory.get_word(0x0040_0000, false).unwrap() as u32, 0x014b_4820);
    }

    #[test]
    fn test_data_directive_emission() {
        let source = ".data\nvalues: .word 1, 2, 3\nbytes: .byte 'a', 'b'\n";
        let (mut memory, _) = assemble_text(source).unwrap();
        assert_eq!(memory.get_word(0x1001_0000, false).unwrap(), 1);
        assert_eq!(memory.get_word(0x1001_0004, false).unwrap(), 2);
        assert_eq!(memory.get_word(0x1001_0008, false).unwrap(), 3);
        assert_eq!(memory.get_byte(0x1001_000c, false).unwrap(), 97);
        assert_eq!(memory.get_byte(0x1001_000d, false).unwrap(), 98);
    }

    #[test]
    fn test_word_replication() {
        let (mut memory, _) = assemble_text(".data\n.word 7 : 3\n").unwrap();
        for i in 0..3 {
            assert_eq!(memory.get_word(0x1001_0000 + 4 * i, false).unwrap(), 7);
        }
        assert_eq!(memory.get_word(0x1001_000c, false).unwrap(), 0);
    }

    #[test]
    fn test_forward_reference_in_data() {
        // S4: a data word referencing a label defined later in text.
        let source = ".data\nptr: .word target\n.text\ntarget: nop\n";
        let (mut memory, program) = assemble_text(source).unwrap();
        let target = program.statements.keys().next().copied().unwrap();
        assert_eq!(memory.get_word(0x1001_0000, false).unwrap() as u32, target);
        assert_eq!(target, 0x0040_0000);
    }

    #[test]
    fn test_label_bytes_little_endian() {
        // The emitted bytes of a data label reference are the address,
        // little-endian serialized with the directive's width.
        let source = ".data\nptr: .word target\n.text\ntarget: nop\n";
        let (mut memory, _) = assemble_text(source).unwrap();
        assert_eq!(memory.get_byte(0x1001_0000, false).unwrap(), 0x00);
        assert_eq!(memory.get_byte(0x1001_0001, false).unwrap(), 0x00);
        assert_eq!(memory.get_byte(0x1001_0002, false).unwrap(), 0x40);
        assert_eq!(memory.get_byte(0x1001_0003, false).unwrap(), 0x00);
    }

    #[test]
    fn test_undefined_forward_reference_reports() {
        let errors = assemble_text(".data\nptr: .word nowhere\n").unwrap_err();
        assert!(errors.iter().any(|d| d.message.contains("Undefined symbol 'nowhere'")));
    }

    #[test]
    fn test_pseudo_li_expansions() {
        // S1 shapes: small li becomes one ori; la becomes lui+ori.
        let source = ".data\nmsg: .asciiz \"hi\"\n.text\nmain: li $v0, 4\nla $a0, msg\nsyscall\n";
        let (mut memory, program) = assemble_text(source).unwrap();

        assert_eq!(memory.get_byte(0x1001_0000, false).unwrap(), 0x68);
        assert_eq!(memory.get_byte(0x1001_0001, false).unwrap(), 0x69);
        assert_eq!(memory.get_byte(0x1001_0002, false).unwrap(), 0x00);

        let listing: Vec<String> =
            program.statements.values().map(|s| s.to_string()).collect();
        assert_eq!(
            listing,
            vec![
                "ori $2,$0,4",
                "lui $1,4097",
                "ori $4,$1,0",
                "syscall",
            ]
        );
    }

    #[test]
    fn test_li_32_bit() {
        let (_, program) = assemble_text(".text\nli $t0, 0x12348765\n").unwrap();
        let listing: Vec<String> =
            program.statements.values().map(|s| s.to_string()).collect();
        assert_eq!(listing, vec!["lui $8,4660", "ori $8,$8,34661"]);
    }

    #[test]
    fn test_branch_pseudo_with_and_without_delay_slots() {
        let source = ".text\nstart: bgt $t0, $t1, start\n";
        let (_, program) = assemble_text(source).unwrap();
        // slt + bne, no delay-slot nop.
        assert_eq!(program.statements.len(), 2);

        let flags = AssemblerFlags { delayed_branching: true, ..Default::default() };
        let (_, program) =
            assemble_text_with(source, flags, MemoryConfiguration::default_layout()).unwrap();
        // slt + bne + nop.
        assert_eq!(program.statements.len(), 3);
        assert_eq!(program.statements[&0x0040_0008].to_string(), "nop");
    }

    #[test]
    fn test_extended_mode_off_rejects_pseudo() {
        let flags = AssemblerFlags { extended_mode: false, ..Default::default() };
        let errors =
            assemble_text_with(".text\nli $t0, 4\n", flags, MemoryConfiguration::default_layout())
                .unwrap_err();
        assert!(errors.errors_occurred());
    }

    #[test]
    fn test_compact_la_expansion() {
        let source = ".data\nx: .word 5\n.text\nla $t0, x\n";
        let (_, program) = assemble_text_with(
            source,
            AssemblerFlags::default(),
            MemoryConfiguration::compact_layout(),
        )
        .unwrap();
        let listing: Vec<String> =
            program.statements.values().map(|s| s.to_string()).collect();
        // 16-bit address space: single instruction.
        assert_eq!(listing, vec!["ori $8,$0,0"]);
    }

    #[test]
    fn test_label_sticks_to_aligned_value() {
        let source = ".data\n.byte 1\nvalue: .word 42\n.text\nlw $t0, value\n";
        let (mut memory, _) = assemble_text(source).unwrap();
        // value is aligned up to 0x1001_0004 and the word lands there.
        assert_eq!(memory.get_word(0x1001_0004, false).unwrap(), 42);
    }

    #[test]
    fn test_macro_expansion_and_recursion_error() {
        let source = "
.macro incr %reg
addi %reg, %reg, 1
.end_macro
.text
incr $t0
incr $t1
";
        let (_, program) = assemble_text(source).unwrap();
        assert_eq!(program.statements.len(), 2);

        // S5: a macro calling itself reports a recursion error.
        let recursive = ".macro a\na\n.end_macro\n.text\na\n";
        let errors = assemble_text(recursive).unwrap_err();
        assert!(errors.iter().any(|d| d.message.contains("Recursive call to macro 'a'")));
    }

    #[test]
    fn test_macro_unique_labels() {
        let source = "
.macro spin
__loop:
b __loop
.end_macro
.text
spin
spin
";
        let (_, program) = assemble_text(source).unwrap();
        // Two expansions assemble without duplicate-label errors.
        assert_eq!(program.statements.len(), 2);
    }

    #[test]
    fn test_duplicate_address_names_prior_occupant() {
        let source = ".text 0x400000\nnop\n.text 0x400000\nnop\n";
        let errors = assemble_text(source).unwrap_err();
        assert!(errors
            .iter()
            .any(|d| d.message.contains("already placed there from test.asm, line 2")));
    }

    #[test]
    fn test_globl_promotes_to_entry_point() {
        let source = ".globl main\n.text\nnop\nmain: nop\n";
        let (_, program) = assemble_text(source).unwrap();
        assert_eq!(program.entry_point, 0x0040_0004);
        assert!(program.globals.get("main").is_some());
    }

    #[test]
    fn test_label_shadowing_mnemonic() {
        // A label named like an instruction mnemonic is allowed.
        let source = ".text\nb: nop\nj b\n";
        let (_, program) = assemble_text(source).unwrap();
        assert_eq!(program.statements.len(), 2);
    }

    #[test]
    fn test_determinism() {
        let source = ".data\nx: .word 1, 2\n.text\nmain: la $t0, x\nlw $t1, 0($t0)\n";
        let first = assemble_text(source).unwrap();
        let second = assemble_text(source).unwrap();
        let words = |memory: &Memory| -> Vec<Option<i32>> {
            (0..8).map(|i| memory.word_if_present(0x0040_0000 + 4 * i)).collect()
        };
        assert_eq!(words(&first.0), words(&second.0));
        assert_eq!(
            first.1.statements.keys().collect::<Vec<_>>(),
            second.1.statements.keys().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_kernel_segments() {
        let source = ".ktext\nmfc0 $k0, $14\neret\n.kdata\n.word 9\n";
        let (mut memory, program) = assemble_text(source).unwrap();
        assert!(program.statements.contains_key(&0x8000_0000));
        assert_eq!(memory.get_word(0x9000_0000, false).unwrap(), 9);
    }

    #[test]
    fn test_instruction_in_data_segment_is_error() {
        let errors = assemble_text(".data\nadd $t0, $t0, $t0\n").unwrap_err();
        assert!(errors.errors_occurred());
    }
}
