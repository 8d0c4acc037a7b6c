// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Exception codes and the per-engine exception registry.
//!
//! Every fallible operation in the runtime returns a numeric code; success
//! is the absence of one (`Ok`). The core codes below are stable: new codes
//! are added at the end of the table. Bindings over external libraries
//! reserve contiguous bands of the client code space with
//! [`Engine::x_register`] and translate their own codes by the returned
//! offset.

use core::fmt;

use crate::execution::engine::Engine;

/// Result alphabet of the whole runtime: either a value or an exception
/// code.
pub type XResult<T> = Result<T, Exception>;

/// A numeric exception code.
///
/// Codes below [`Exception::CLIENT_BASE`] name the core table; codes at or
/// above it belong to client bands allocated by [`Engine::x_register`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Exception(u16);

macro_rules! exceptions {
    ($($name:ident = $desc:literal,)*) => {
        #[allow(non_camel_case_types, clippy::upper_case_acronyms)]
        #[derive(Clone, Copy)]
        #[repr(u16)]
        enum Core { $($name,)* }

        const CORE_NAMES: &[&str] = &[$(stringify!($name),)*];
        const CORE_DESCRIPTIONS: &[&str] = &[$($desc,)*];

        impl Exception {
            $(pub const $name: Exception = Exception(Core::$name as u16 + 1);)*
        }
    };
}

exceptions! {
    // VM exceptions
    YIELD = "Give up VM if there is other work",
    COUNTER = "Runlimit instruction counter exhausted",
    END = "Thread returns from top level",
    RETURN = "Return from actual function",
    REFUSE = "Object refused to destruct",
    OTHER = "Other - check engine state",
    VMCHECK = "Error detected by VM checking",
    BADEXCEPTION = "Bad exception value type",

    // Internal/VM/native errors
    INTERNAL = "Internal error in EEL",
    VMERROR = "Unspecified VM error",

    // General VM and operator exceptions
    ILLEGAL = "Illegal opcode",
    NOTIMPLEMENTED = "Feature not implemented",
    CANTREAD = "Object cannot be read",
    CANTWRITE = "Object cannot be written",
    CANTINDEX = "Object cannot be indexed",
    CANTINPLACE = "Inplace operation not possible",
    UPVALUE = "Upvalue(s) not accessible",
    CASTFAILED = "Type cast failed",
    NOMETAMETHOD = "Metamethod not implemented",
    NOCONSTRUCTOR = "No constructor",
    CONSTRUCTOR = "Constructor failed",
    BADCONTEXT = "Not possible in this context",

    // Argument and operand errors
    ARGUMENTS = "Incorrect argument list",
    FEWARGS = "Too few arguments",
    MANYARGS = "Too many arguments",
    TUPLEARGS = "Incomplete argument tuple",
    NORESULT = "No result available",
    NEEDREAL = "Argument must be real type",
    NEEDINTEGER = "Argument must be integer type",
    NEEDBOOLEAN = "Argument must be boolean type",
    NEEDTYPEID = "Argument must be typeid type",
    NEEDOBJECT = "Argument must be object type",
    NEEDSTRING = "Argument must be string type",
    NEEDMODULE = "Argument must be a module",
    NEEDCALLABLE = "Argument must be callable object",
    WRONGTYPE = "Wrong type",
    BADTYPE = "Illegal value type ID",
    BADCLASS = "Illegal class type ID",
    LOWINDEX = "Index out of range; too low",
    HIGHINDEX = "Index out of range; too high",
    WRONGINDEX = "Nonexistent index (index-by-name)",
    FEWITEMS = "Container has too few items",

    // Math and other operation errors
    LOWVALUE = "Value out of range; too low",
    HIGHVALUE = "Value out of range; too high",
    BADVALUE = "Incorrect value",
    DIVBYZERO = "Division by zero",
    OVERFLOW = "Too large value",
    UNDERFLOW = "Too small value",
    DOMAIN = "Math domain error",
    MATHERROR = "Other math errors",
    ILLEGALOPERATION = "Illegal operation",

    // System errors
    MEMORY = "Out of memory",
    EOF = "End of file",
    FILEOPEN = "Error opening file",
    FILESEEK = "Error seeking in file",
    FILEREAD = "Error reading file",
    FILEWRITE = "Error writing file",
    FILELOAD = "Unspecified load error",
    FILESAVE = "Unspecified save error",
    FILEOPENED = "File is already open",
    FILECLOSED = "File is closed",
    FILEERROR = "Unspecified file I/O error",
    DEVICEOPEN = "Error opening device",
    DEVICEREAD = "Error reading from device",
    DEVICEWRITE = "Error writing to device",
    DEVICECONTROL = "Error controlling device",
    DEVICEOPENED = "Device is already open",
    DEVICECLOSED = "Device is closed",
    DEVICEERROR = "Unspecified device I/O error",
    SHARINGVIOLATION = "Sharing violation",
    THREADCREATE = "Could not create thread",
    BUFOVERFLOW = "Buffer overflow",
    WRONGFORMAT = "Data has bad or unsupported format",

    // Lexer and parser exceptions
    NONUMBER = "Not a valid number",
    BADBASE = "Bad base syntax",
    BIGBASE = "Too big base",
    BADINTEGER = "Bad integer part format",
    BADFRACTION = "Bad fraction part format",
    BADEXPONENT = "Bad exponent format",
    REALNUMBER = "Enforce real value (lexer)",

    // Compiler and API errors
    COMPILE = "Compile error",
    SYNTAX = "Unspecified syntax error",
    NOTFOUND = "Object not found (call by name)",
    MODULELOAD = "Module loading failed",
    MODULEINIT = "Module initialization failed",
    CANTSETMETHOD = "Could not set (meta)method",
    NEEDNAME = "Object needs a name",
    BADXCODE = "Illegal exception code",
    WIDEXRANGE = "Too wide range of exception codes",
    NOFREEBLOCKS = "No more exception code blocks available",
}

impl Exception {
    /// First code of the client space. Core codes are below this; bands
    /// handed out by [`Engine::x_register`] live at or above it.
    pub const CLIENT_BASE: u16 = 256;
    pub(crate) const CLIENT_END: u16 = 4096;
    pub(crate) const MAX_BLOCK: u16 = 1024;

    pub(crate) const CORE_COUNT: u16 = CORE_NAMES.len() as u16;

    /// The raw numeric code. Never zero.
    pub fn code(self) -> u16 {
        self.0
    }

    /// A code in a client band: `offset` as returned by
    /// [`Engine::x_register`] plus the client's own code.
    pub fn client(offset: u16, code: u16) -> Exception {
        Exception(offset + code)
    }

    pub fn is_core(self) -> bool {
        self.0 <= Self::CORE_COUNT
    }

    fn core_index(self) -> Option<usize> {
        self.is_core().then(|| (self.0 - 1) as usize)
    }
}

impl fmt::Debug for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.core_index() {
            Some(i) => write!(f, "X{}", CORE_NAMES[i]),
            None => write!(f, "X#{}", self.0),
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.core_index() {
            Some(i) => f.write_str(CORE_DESCRIPTIONS[i]),
            None => write!(f, "client exception {}", self.0),
        }
    }
}

/// One entry of a client exception table passed to [`Engine::x_register`].
/// `code` is the client's own (band-relative) code.
#[derive(Debug, Clone, Copy)]
pub struct Xdef {
    pub code: u16,
    pub name: &'static str,
    pub description: &'static str,
}

/// Per-engine registry of client exception bands.
pub(crate) struct ClientExceptions {
    blocks: Vec<ClientBlock>,
    next: u16,
}

struct ClientBlock {
    first: u16,
    entries: Vec<Option<(&'static str, &'static str)>>,
}

impl ClientExceptions {
    pub(crate) fn new() -> Self {
        ClientExceptions {
            blocks: Vec::new(),
            next: Exception::CLIENT_BASE,
        }
    }

    fn register(&mut self, defs: &[Xdef]) -> XResult<u16> {
        if defs.is_empty() {
            return Err(Exception::BADXCODE);
        }
        let mut size = 0u16;
        for d in defs {
            if d.name.is_empty() {
                return Err(Exception::BADXCODE);
            }
            size = size.max(d.code + 1);
        }
        if size > Exception::MAX_BLOCK {
            return Err(Exception::WIDEXRANGE);
        }
        if self.next + size > Exception::CLIENT_END {
            return Err(Exception::NOFREEBLOCKS);
        }
        let mut entries = vec![None; size as usize];
        for d in defs {
            let slot = &mut entries[d.code as usize];
            if slot.is_some() {
                return Err(Exception::BADXCODE);
            }
            *slot = Some((d.name, d.description));
        }
        let offset = self.next;
        self.next += size;
        self.blocks.push(ClientBlock {
            first: offset,
            entries,
        });
        Ok(offset)
    }

    fn lookup(&self, x: Exception) -> Option<(&'static str, &'static str)> {
        let code = x.code();
        self.blocks
            .iter()
            .find(|b| code >= b.first && (code - b.first) < b.entries.len() as u16)
            .and_then(|b| b.entries[(code - b.first) as usize])
    }
}

/// Message severities for the engine error queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Info,
    Warning,
    Error,
    VmWarning,
    VmError,
    Internal,
}

/// Source location carried by compile-time messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePos {
    pub file: Box<str>,
    pub line: u32,
    pub col: u32,
}

pub(crate) struct EngineMessage {
    pub(crate) kind: MessageKind,
    pub(crate) pos: Option<SourcePos>,
    pub(crate) text: Box<str>,
}

impl Engine {
    /// Register a band of client exception codes. Returns the offset to add
    /// to the client's own codes to obtain engine codes.
    pub fn x_register(&mut self, defs: &[Xdef]) -> XResult<u16> {
        self.exceptions.register(defs)
    }

    /// The short name of an exception code, core or client.
    pub fn x_name(&self, x: Exception) -> &str {
        match x.core_index() {
            Some(i) => CORE_NAMES[i],
            None => self.exceptions.lookup(x).map(|e| e.0).unwrap_or("UNKNOWN"),
        }
    }

    /// The human-readable description of an exception code.
    pub fn x_description(&self, x: Exception) -> &str {
        match x.core_index() {
            Some(i) => CORE_DESCRIPTIONS[i],
            None => self
                .exceptions
                .lookup(x)
                .map(|e| e.1)
                .unwrap_or("Unknown exception code"),
        }
    }

    /// Queue a diagnostic message.
    pub fn message(&mut self, kind: MessageKind, text: &str) {
        self.emit(kind, None, format_args!("{text}"));
    }

    /// Queue a compile-time diagnostic carrying a source position.
    pub fn message_at(&mut self, kind: MessageKind, pos: SourcePos, text: &str) {
        self.emit(kind, Some(pos), format_args!("{text}"));
    }

    pub(crate) fn emit(&mut self, kind: MessageKind, pos: Option<SourcePos>, args: fmt::Arguments) {
        let id = self.sbuffers.alloc();
        self.sbuffers.write(id, args);
        let text: Box<str> = self.sbuffers.as_str(id).into();
        self.sbuffers.free(id);
        self.messages.push(EngineMessage { kind, pos, text });
    }

    /// Flush the message queue to the log. Returns the number of messages
    /// flushed.
    pub fn perror(&mut self) -> usize {
        let messages = core::mem::take(&mut self.messages);
        let count = messages.len();
        for m in messages {
            match (&m.pos, m.kind) {
                (Some(p), MessageKind::Info) => {
                    log::info!("{}:{}:{}: {}", p.file, p.line, p.col, m.text)
                }
                (Some(p), MessageKind::Warning | MessageKind::VmWarning) => {
                    log::warn!("{}:{}:{}: {}", p.file, p.line, p.col, m.text)
                }
                (Some(p), _) => log::error!("{}:{}:{}: {}", p.file, p.line, p.col, m.text),
                (None, MessageKind::Info) => log::info!("{}", m.text),
                (None, MessageKind::Warning | MessageKind::VmWarning) => {
                    log::warn!("{}", m.text)
                }
                (None, _) => log::error!("{}", m.text),
            }
        }
        count
    }
}
