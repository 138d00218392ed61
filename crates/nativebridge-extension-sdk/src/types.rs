//! Metadata and call-surface declarations.
//!
//! An extension describes itself with [`ExtensionMetadata`]. The embedded
//! [`ExtensionSurface`] declares every command the host may issue, how the
//! command is invoked, and the schema its arguments are coerced against
//! before they cross the boundary. Hosts install this declaration instead of
//! evaluating extension-supplied code.

use serde::{Deserialize, Serialize};

/// Current extension ABI version.
pub const NB_EXT_ABI_VERSION: u32 = 1;

/// How a command is issued over the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallMode {
    /// Fire-and-forget; no reply is expected.
    Post,
    /// The caller is suspended until the direct reply arrives.
    Blocking,
    /// A correlation id is attached and the reply is routed back later.
    Async,
}

impl CallMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallMode::Post => "post",
            CallMode::Blocking => "blocking",
            CallMode::Async => "async",
        }
    }
}

impl std::fmt::Display for CallMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target kind of a single call argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArgKind {
    Boolean,
    /// Signed 8-bit integer.
    Byte,
    /// Unsigned 8-bit integer.
    Octet,
    Short,
    UnsignedShort,
    Long,
    UnsignedLong,
    LongLong,
    UnsignedLongLong,
    /// Finite floating point number.
    Double,
    String,
    /// A callable supplied by the caller. Never serialized.
    Function,
    /// A non-null object or a callable.
    Dictionary,
    /// A string restricted to a fixed set of values.
    Enum { values: Vec<String> },
    /// A sequence; each element is coerced to `element` when declared.
    Array {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        element: Option<Box<ArgKind>>,
    },
    /// An object whose named members, when present, must be callables.
    Listener { callbacks: Vec<String> },
}

impl ArgKind {
    /// Human readable kind name used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            ArgKind::Boolean => "boolean",
            ArgKind::Byte => "byte",
            ArgKind::Octet => "octet",
            ArgKind::Short => "short",
            ArgKind::UnsignedShort => "unsigned short",
            ArgKind::Long => "long",
            ArgKind::UnsignedLong => "unsigned long",
            ArgKind::LongLong => "long long",
            ArgKind::UnsignedLongLong => "unsigned long long",
            ArgKind::Double => "double",
            ArgKind::String => "string",
            ArgKind::Function => "function",
            ArgKind::Dictionary => "dictionary",
            ArgKind::Enum { .. } => "enum",
            ArgKind::Array { .. } => "array",
            ArgKind::Listener { .. } => "listener",
        }
    }

    pub fn array_of(element: ArgKind) -> Self {
        ArgKind::Array {
            element: Some(Box::new(element)),
        }
    }

    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ArgKind::Enum {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn listener<I, S>(callbacks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ArgKind::Listener {
            callbacks: callbacks.into_iter().map(Into::into).collect(),
        }
    }
}

/// Declaration of one call argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgSpec {
    pub name: String,
    pub kind: ArgKind,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub nullable: bool,
}

impl ArgSpec {
    pub fn new(name: impl Into<String>, kind: ArgKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: false,
            nullable: false,
        }
    }

    /// Mark the argument as optional (may be omitted).
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Mark the argument as nullable (may be explicitly null).
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Declaration of one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub name: String,
    pub mode: CallMode,
    #[serde(default)]
    pub args: Vec<ArgSpec>,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, mode: CallMode) -> Self {
        Self {
            name: name.into(),
            mode,
            args: Vec::new(),
        }
    }

    pub fn post(name: impl Into<String>) -> Self {
        Self::new(name, CallMode::Post)
    }

    pub fn blocking(name: impl Into<String>) -> Self {
        Self::new(name, CallMode::Blocking)
    }

    pub fn non_blocking(name: impl Into<String>) -> Self {
        Self::new(name, CallMode::Async)
    }

    /// Append an argument declaration.
    pub fn arg(mut self, spec: ArgSpec) -> Self {
        self.args.push(spec);
        self
    }
}

/// Everything the host may call on, or hear from, an extension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionSurface {
    #[serde(default)]
    pub commands: Vec<CommandSpec>,
    #[serde(default)]
    pub events: Vec<String>,
}

impl ExtensionSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_command(mut self, command: CommandSpec) -> Self {
        self.commands.push(command);
        self
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.events.push(event.into());
        self
    }

    pub fn command(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.iter().find(|c| c.name == name)
    }

    pub fn declares_event(&self, name: &str) -> bool {
        self.events.iter().any(|e| e == name)
    }
}

/// Extension metadata, queried once per library before instantiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionMetadata {
    /// Stable extension identifier (e.g., "org.example.battery")
    pub id: String,
    /// Display name
    pub name: String,
    pub version: semver::Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Declared call surface
    #[serde(default)]
    pub surface: ExtensionSurface,
}

impl ExtensionMetadata {
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: semver::Version) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version,
            description: None,
            author: None,
            surface: ExtensionSurface::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_surface(mut self, surface: ExtensionSurface) -> Self {
        self.surface = surface;
        self
    }
}
