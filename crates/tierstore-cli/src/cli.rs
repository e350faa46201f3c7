use clap::{Args, Parser, Subcommand, ValueEnum};
use tierstore_core::{Accessibility, StoreKind};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "tierstore",
    about = "Typed key-value store over plaintext, encrypted, memory and cloud tiers",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print version and exit.
    Version,
    /// Round-trip a probe value through every tier.
    Health,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the JSON value stored under a key.
    Get(KeyArgs),
    /// Store a value. Input that is not valid JSON is stored as a string.
    Set {
        #[command(flatten)]
        key: KeyArgs,
        value: String,
        /// Protection class for encrypted keys.
        #[arg(long, value_enum)]
        accessible: Option<AccessibleArg>,
    },
    /// Remove the value stored under a key.
    Unset(KeyArgs),
    /// Erase every entry of the given tiers.
    Clear {
        #[arg(required = true, value_enum)]
        kinds: Vec<KindArg>,
    },
    /// Erase every tier.
    Destroy {
        /// Confirm the erase.
        #[arg(long)]
        yes: bool,
    },
    /// Push and pull the cloud tier and flush buffered plaintext writes.
    Sync,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct KeyArgs {
    #[arg(value_enum)]
    pub kind: KindArg,
    pub name: String,
    /// Instance discriminator appended to the key name.
    #[arg(long)]
    pub id: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindArg {
    Plaintext,
    Encrypted,
    Memory,
    Cloud,
}

impl From<KindArg> for StoreKind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Plaintext => StoreKind::Plaintext,
            KindArg::Encrypted => StoreKind::Encrypted,
            KindArg::Memory => StoreKind::Memory,
            KindArg::Cloud => StoreKind::Cloud,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessibleArg {
    WhenUnlocked,
    AfterFirstUnlock,
    Always,
    WhenPasscodeSetThisDeviceOnly,
    WhenUnlockedThisDeviceOnly,
    AfterFirstUnlockThisDeviceOnly,
    AlwaysThisDeviceOnly,
}

impl From<AccessibleArg> for Accessibility {
    fn from(arg: AccessibleArg) -> Self {
        match arg {
            AccessibleArg::WhenUnlocked => Accessibility::WhenUnlocked,
            AccessibleArg::AfterFirstUnlock => Accessibility::AfterFirstUnlock,
            AccessibleArg::Always => Accessibility::Always,
            AccessibleArg::WhenPasscodeSetThisDeviceOnly => {
                Accessibility::WhenPasscodeSetThisDeviceOnly
            }
            AccessibleArg::WhenUnlockedThisDeviceOnly => Accessibility::WhenUnlockedThisDeviceOnly,
            AccessibleArg::AfterFirstUnlockThisDeviceOnly => {
                Accessibility::AfterFirstUnlockThisDeviceOnly
            }
            AccessibleArg::AlwaysThisDeviceOnly => Accessibility::AlwaysThisDeviceOnly,
        }
    }
}
