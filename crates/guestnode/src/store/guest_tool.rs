// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Key/value store backed by a hypervisor guest-tool CLI.
//!
//! VMware, VirtualBox and XenServer all ship a command line tool inside the
//! guest that reads and writes the host-visible property store. The tools
//! differ only in argv shape and in how they report a missing key, which is
//! what [`ToolDialect`] captures.

use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{KvStore, Result, StoreError};

/// Argv and output conventions of a guest tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolDialect {
    /// `vmware-rpctool "info-get guestinfo.<key>"`
    VmwareRpc {
        /// Path or name of `vmware-rpctool`.
        tool: String,
    },
    /// `VBoxControl --nologo guestproperty get <prefix><key>`
    VBoxControl {
        /// Path or name of `VBoxControl`.
        tool: String,
        /// Property path prefix, e.g. `/guestnode/`.
        prefix: String,
    },
    /// `xenstore-read <prefix><key>` / `xenstore-write <prefix><key> <value>`
    XenStore {
        /// Path or name of `xenstore-read`.
        read_tool: String,
        /// Path or name of `xenstore-write`.
        write_tool: String,
        /// Store path prefix, e.g. `vm-data/`.
        prefix: String,
    },
}

impl ToolDialect {
    /// VMware Tools with the default binary name.
    pub fn vmware() -> Self {
        Self::VmwareRpc {
            tool: "vmware-rpctool".to_string(),
        }
    }

    /// VirtualBox Guest Additions with the default binary name and prefix.
    pub fn virtualbox() -> Self {
        Self::VBoxControl {
            tool: "VBoxControl".to_string(),
            prefix: "/guestnode/".to_string(),
        }
    }

    /// Xen guest utilities with the default binary names and prefix.
    pub fn xenstore() -> Self {
        Self::XenStore {
            read_tool: "xenstore-read".to_string(),
            write_tool: "xenstore-write".to_string(),
            prefix: "vm-data/".to_string(),
        }
    }

    /// Program and arguments that read `key`.
    pub fn get_command(&self, key: &str) -> (String, Vec<String>) {
        match self {
            Self::VmwareRpc { tool } => (tool.clone(), vec![format!("info-get guestinfo.{key}")]),
            Self::VBoxControl { tool, prefix } => (
                tool.clone(),
                vec![
                    "--nologo".to_string(),
                    "guestproperty".to_string(),
                    "get".to_string(),
                    format!("{prefix}{key}"),
                ],
            ),
            Self::XenStore {
                read_tool, prefix, ..
            } => (read_tool.clone(), vec![format!("{prefix}{key}")]),
        }
    }

    /// Program and arguments that write `key = value`.
    pub fn set_command(&self, key: &str, value: &str) -> (String, Vec<String>) {
        match self {
            // rpctool takes the whole request as a single argument
            Self::VmwareRpc { tool } => (
                tool.clone(),
                vec![format!("info-set guestinfo.{key} {value}")],
            ),
            Self::VBoxControl { tool, prefix } => (
                tool.clone(),
                vec![
                    "--nologo".to_string(),
                    "guestproperty".to_string(),
                    "set".to_string(),
                    format!("{prefix}{key}"),
                    value.to_string(),
                ],
            ),
            Self::XenStore {
                write_tool, prefix, ..
            } => (
                write_tool.clone(),
                vec![format!("{prefix}{key}"), value.to_string()],
            ),
        }
    }

    /// Marker the tool prints when the key does not exist.
    fn missing_marker(&self) -> &'static str {
        match self {
            Self::VmwareRpc { .. } => "No value found",
            Self::VBoxControl { .. } => "No value set",
            Self::XenStore { .. } => "couldn't read",
        }
    }

    /// Interpret the output of a read command.
    pub fn parse_get(&self, tool: &str, output: &Output) -> Result<Option<String>> {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if stdout.contains(self.missing_marker()) || stderr.contains(self.missing_marker()) {
            return Ok(None);
        }

        if !output.status.success() {
            return Err(StoreError::ToolFailed {
                tool: tool.to_string(),
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        match self {
            Self::VBoxControl { .. } => {
                let value = stdout
                    .lines()
                    .find_map(|line| line.trim().strip_prefix("Value:"))
                    .map(|v| v.trim().to_string());
                match value {
                    Some(v) => Ok(Some(v)),
                    None => Err(StoreError::Malformed(format!(
                        "{tool} printed no value line: {}",
                        stdout.trim()
                    ))),
                }
            }
            _ => Ok(Some(stdout.trim().to_string())),
        }
    }
}

/// [`KvStore`] that shells out to a guest tool for every operation.
#[derive(Debug, Clone)]
pub struct GuestToolStore {
    dialect: ToolDialect,
}

impl GuestToolStore {
    /// Create a store speaking `dialect`.
    pub fn new(dialect: ToolDialect) -> Self {
        Self { dialect }
    }

    /// Dialect in use.
    pub fn dialect(&self) -> &ToolDialect {
        &self.dialect
    }

    async fn invoke(&self, program: &str, args: &[String]) -> Result<Output> {
        match Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::null())
            .output()
            .await
        {
            Ok(output) => Ok(output),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::ToolNotFound(program.to_string()))
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

#[async_trait]
impl KvStore for GuestToolStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let (program, args) = self.dialect.get_command(key);
        let output = self.invoke(&program, &args).await?;
        let value = self.dialect.parse_get(&program, &output)?;
        debug!(tool = %program, key = %key, found = value.is_some(), "Guest tool read");
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let (program, args) = self.dialect.set_command(key, value);
        let output = self.invoke(&program, &args).await?;
        if !output.status.success() {
            return Err(StoreError::ToolFailed {
                tool: program,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        debug!(tool = %program, key = %key, "Guest tool write");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    fn output(code: i32, stdout: &str, stderr: &str) -> Output {
        Output {
            status: ExitStatus::from_raw(code << 8),
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_vmware_commands() {
        let dialect = ToolDialect::vmware();
        let (program, args) = dialect.get_command("holdingVM");
        assert_eq!(program, "vmware-rpctool");
        assert_eq!(args, vec!["info-get guestinfo.holdingVM"]);

        let (_, args) = dialect.set_command("nodeUrl.0", "pnp://10.0.0.4:64738/node");
        assert_eq!(args, vec!["info-set guestinfo.nodeUrl.0 pnp://10.0.0.4:64738/node"]);
    }

    #[test]
    fn test_virtualbox_commands() {
        let dialect = ToolDialect::virtualbox();
        let (program, args) = dialect.get_command("hostCapacity");
        assert_eq!(program, "VBoxControl");
        assert_eq!(
            args,
            vec!["--nologo", "guestproperty", "get", "/guestnode/hostCapacity"]
        );
    }

    #[test]
    fn test_xenstore_commands() {
        let dialect = ToolDialect::xenstore();
        let (program, args) = dialect.set_command("nodeUrl.1", "addr");
        assert_eq!(program, "xenstore-write");
        assert_eq!(args, vec!["vm-data/nodeUrl.1", "addr"]);
    }

    #[test]
    fn test_parse_vmware_value() {
        let dialect = ToolDialect::vmware();
        let value = dialect
            .parse_get("vmware-rpctool", &output(0, "vm-042\n", ""))
            .unwrap();
        assert_eq!(value.as_deref(), Some("vm-042"));
    }

    #[test]
    fn test_parse_vmware_missing() {
        let dialect = ToolDialect::vmware();
        let value = dialect
            .parse_get("vmware-rpctool", &output(1, "No value found\n", ""))
            .unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_parse_virtualbox_value_line() {
        let dialect = ToolDialect::virtualbox();
        let value = dialect
            .parse_get("VBoxControl", &output(0, "Value: 4\n", ""))
            .unwrap();
        assert_eq!(value.as_deref(), Some("4"));

        let missing = dialect
            .parse_get("VBoxControl", &output(2, "No value set!\n", ""))
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_parse_virtualbox_without_value_line() {
        let dialect = ToolDialect::virtualbox();
        let err = dialect
            .parse_get("VBoxControl", &output(0, "something else\n", ""))
            .unwrap_err();
        assert!(matches!(err, StoreError::Malformed(_)));
    }

    #[test]
    fn test_parse_xenstore_missing_and_failure() {
        let dialect = ToolDialect::xenstore();
        let missing = dialect
            .parse_get(
                "xenstore-read",
                &output(1, "", "xenstore-read: couldn't read path vm-data/holdingVM\n"),
            )
            .unwrap();
        assert!(missing.is_none());

        let err = dialect
            .parse_get("xenstore-read", &output(1, "", "Permission denied\n"))
            .unwrap_err();
        assert!(matches!(err, StoreError::ToolFailed { .. }));
    }

    #[tokio::test]
    async fn test_missing_tool_is_reported() {
        let store = GuestToolStore::new(ToolDialect::VmwareRpc {
            tool: "/nonexistent/guestnode-rpctool".to_string(),
        });
        let err = store.get("holdingVM").await.unwrap_err();
        assert!(matches!(err, StoreError::ToolNotFound(_)));
    }
}
