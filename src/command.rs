/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: command.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-03-02 16:27:50
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-03-06 11:40:02
 */

use crate::config::FetchersConfig;
use crate::credentials::Plaintext;
use crate::models::{FetcherRecord, TransportSecurity};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable carrying the password in [`PasswordMode::Env`].
pub const PASSWORD_ENV: &str = "MAIL_FETCHER_PASSWORD";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("fetcher has no incoming server")]
    MissingServer,

    #[error("fetcher has no incoming login")]
    MissingLogin,

    #[error("account email {0:?} does not split into local part and domain")]
    InvalidEmail(String),
}

/// How the decrypted password reaches mpop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PasswordMode {
    /// `--passwordeval=echo '<password>'`
    #[default]
    Eval,
    /// `--passwordeval` reads the password from the child environment, so it
    /// never appears in any argument vector.
    Env,
}

/// Per-mailbox data directory of the account a fetcher delivers into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxLocation {
    pub email: String,
    pub local_part: String,
    pub domain: String,
    pub dir: PathBuf,
}

impl MailboxLocation {
    /// Resolves `<data_root>/<domain>/<local_part>` for an email address.
    pub fn resolve(data_root: &Path, email: &str) -> Result<Self, CommandError> {
        let (local_part, domain) = email
            .rsplit_once('@')
            .filter(|(local, domain)| !local.is_empty() && !domain.is_empty())
            .ok_or_else(|| CommandError::InvalidEmail(email.to_string()))?;

        Ok(Self {
            email: email.to_string(),
            local_part: local_part.to_string(),
            domain: domain.to_string(),
            dir: data_root.join(domain).join(local_part),
        })
    }

    /// mpop's UIDL bookkeeping file for one fetcher.
    pub fn uidls_file(&self, fetcher_id: u64) -> PathBuf {
        self.dir.join(format!("fetcher-id{}-uidls", fetcher_id))
    }
}

/// A ready-to-spawn mpop invocation.
#[derive(Clone)]
pub struct FetchCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

// Display and Debug both mask the password, whichever way it is passed.
impl fmt::Display for FetchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.starts_with("--passwordeval=") {
                write!(f, " --passwordeval=<redacted>")?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for FetchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("FetchCommand")
            .field("command", &self.to_string())
            .field("env", &env)
            .finish()
    }
}

pub struct CommandBuilder {
    mpop_binary: PathBuf,
    delivery_script: PathBuf,
    data_folder: PathBuf,
    password_mode: PasswordMode,
    tool_debug: bool,
}

impl CommandBuilder {
    pub fn new(config: &FetchersConfig) -> Self {
        Self {
            mpop_binary: config.mpop_binary.clone(),
            delivery_script: config.delivery_script.clone(),
            data_folder: config.data_folder.clone(),
            password_mode: config.password_mode,
            tool_debug: config.tool_debug,
        }
    }

    pub fn data_folder(&self) -> &Path {
        &self.data_folder
    }

    pub fn build(
        &self,
        record: &FetcherRecord,
        mailbox: &MailboxLocation,
        password: &Plaintext,
    ) -> Result<FetchCommand, CommandError> {
        if record.server.trim().is_empty() {
            return Err(CommandError::MissingServer);
        }
        if record.login.trim().is_empty() {
            return Err(CommandError::MissingLogin);
        }

        let (tls, starttls) = match record.transport_security {
            TransportSecurity::Implicit => ("on", "off"),
            TransportSecurity::StartTls => ("on", "on"),
            TransportSecurity::None => ("off", "off"),
        };

        // mpop hands the MDA command to /bin/sh, so every value is quoted.
        let delivery = format!(
            "mda,{} -d {} -m {}",
            quote_if_needed(&self.delivery_script.display().to_string()),
            quote_if_needed(&mailbox.email),
            shell_quote(&record.target_folder),
        );

        let mut args = vec![
            format!("--host={}", record.server),
            format!("--port={}", record.port),
            format!("--user={}", record.login),
            "--auth=user".to_string(),
            format!("--uidls-file={}", mailbox.uidls_file(record.id).display()),
            format!("--delivery={}", delivery),
            format!("--keep={}", on_off(record.leave_on_server)),
            "--only-new=on".to_string(),
            format!("--tls={}", tls),
            "--tls-certcheck=off".to_string(),
            format!("--tls-starttls={}", starttls),
            "--received-header=off".to_string(),
            "--half-quiet".to_string(),
        ];
        if self.tool_debug {
            args.push("-d".to_string());
        }

        let mut env = Vec::new();
        match self.password_mode {
            PasswordMode::Eval => {
                args.push(format!(
                    "--passwordeval=echo {}",
                    shell_quote(password.expose())
                ));
            }
            PasswordMode::Env => {
                args.push(format!("--passwordeval=printf '%s\\n' \"${}\"", PASSWORD_ENV));
                env.push((PASSWORD_ENV.to_string(), password.expose().to_string()));
            }
        }

        Ok(FetchCommand {
            program: self.mpop_binary.clone(),
            args,
            env,
        })
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag { "on" } else { "off" }
}

/// Wraps `value` in single quotes for POSIX sh; embedded quotes become `'\''`.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Leaves plain words alone and quotes anything else.
pub fn quote_if_needed(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./_-".contains(c));
    if plain {
        value.to_string()
    } else {
        shell_quote(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder(password_mode: PasswordMode) -> CommandBuilder {
        CommandBuilder {
            mpop_binary: PathBuf::from("/usr/bin/mpop"),
            delivery_script: PathBuf::from("/usr/lib/dovecot/dovecot-lda"),
            data_folder: PathBuf::from("/opt/afterlogic/data"),
            password_mode,
            tool_debug: false,
        }
    }

    fn record() -> FetcherRecord {
        FetcherRecord {
            id: 7,
            server: "pop.remote.example".to_string(),
            port: 995,
            login: "remote-user".to_string(),
            target_folder: "Fetched".to_string(),
            transport_security: TransportSecurity::StartTls,
            leave_on_server: false,
            ..Default::default()
        }
    }

    fn mailbox() -> MailboxLocation {
        MailboxLocation::resolve(Path::new("/opt/afterlogic/data"), "alice@example.com").unwrap()
    }

    #[test]
    fn test_resolve_mailbox() {
        let mailbox = mailbox();
        assert_eq!(mailbox.local_part, "alice");
        assert_eq!(mailbox.domain, "example.com");
        assert_eq!(
            mailbox.dir,
            PathBuf::from("/opt/afterlogic/data/example.com/alice")
        );
    }

    #[test]
    fn test_resolve_rejects_bad_emails() {
        for email in ["", "alice", "@example.com", "alice@"] {
            assert_eq!(
                MailboxLocation::resolve(Path::new("/data"), email),
                Err(CommandError::InvalidEmail(email.to_string()))
            );
        }
    }

    #[test]
    fn test_starttls_command_shape() {
        let cmd = builder(PasswordMode::Eval)
            .build(&record(), &mailbox(), &Plaintext::new("secret"))
            .unwrap();

        assert_eq!(cmd.program, PathBuf::from("/usr/bin/mpop"));
        assert!(cmd.args.contains(&"--tls=on".to_string()));
        assert!(cmd.args.contains(&"--tls-starttls=on".to_string()));
        assert!(cmd.args.contains(&"--keep=off".to_string()));

        let uidls: Vec<&String> = cmd
            .args
            .iter()
            .filter(|a| a.starts_with("--uidls-file="))
            .collect();
        assert_eq!(uidls.len(), 1);
        assert!(uidls[0].contains("fetcher-id7-uidls"));
    }

    #[test]
    fn test_full_argument_list() {
        let cmd = builder(PasswordMode::Eval)
            .build(&record(), &mailbox(), &Plaintext::new("secret"))
            .unwrap();

        assert_eq!(
            cmd.args,
            vec![
                "--host=pop.remote.example",
                "--port=995",
                "--user=remote-user",
                "--auth=user",
                "--uidls-file=/opt/afterlogic/data/example.com/alice/fetcher-id7-uidls",
                "--delivery=mda,/usr/lib/dovecot/dovecot-lda -d alice@example.com -m 'Fetched'",
                "--keep=off",
                "--only-new=on",
                "--tls=on",
                "--tls-certcheck=off",
                "--tls-starttls=on",
                "--received-header=off",
                "--half-quiet",
                "--passwordeval=echo 'secret'",
            ]
        );
        assert!(cmd.env.is_empty());
    }

    #[test]
    fn test_transport_security_mapping() {
        let b = builder(PasswordMode::Eval);
        let pw = Plaintext::new("x");

        let mut r = record();
        r.transport_security = TransportSecurity::Implicit;
        r.leave_on_server = true;
        let args = b.build(&r, &mailbox(), &pw).unwrap().args;
        assert!(args.contains(&"--tls=on".to_string()));
        assert!(args.contains(&"--tls-starttls=off".to_string()));
        assert!(args.contains(&"--keep=on".to_string()));

        r.transport_security = TransportSecurity::None;
        let args = b.build(&r, &mailbox(), &pw).unwrap().args;
        assert!(args.contains(&"--tls=off".to_string()));
        assert!(args.contains(&"--tls-starttls=off".to_string()));
    }

    #[test]
    fn test_hostile_values_are_quoted() {
        let mut r = record();
        r.target_folder = "x'; rm -rf / #".to_string();
        let cmd = builder(PasswordMode::Eval)
            .build(&r, &mailbox(), &Plaintext::new("it's $(id)"))
            .unwrap();

        assert!(cmd.args.contains(
            &r"--delivery=mda,/usr/lib/dovecot/dovecot-lda -d alice@example.com -m 'x'\''; rm -rf / #'"
                .to_string()
        ));
        assert!(cmd.args.contains(&r"--passwordeval=echo 'it'\''s $(id)'".to_string()));
    }

    #[test]
    fn test_env_password_mode_keeps_password_out_of_args() {
        let cmd = builder(PasswordMode::Env)
            .build(&record(), &mailbox(), &Plaintext::new("secret"))
            .unwrap();

        assert!(cmd.args.iter().all(|a| !a.contains("secret")));
        assert_eq!(
            cmd.env,
            vec![(PASSWORD_ENV.to_string(), "secret".to_string())]
        );
    }

    #[test]
    fn test_missing_server_or_login_rejected() {
        let b = builder(PasswordMode::Eval);
        let pw = Plaintext::new("x");

        let mut r = record();
        r.server = " ".to_string();
        assert_eq!(
            b.build(&r, &mailbox(), &pw).unwrap_err(),
            CommandError::MissingServer
        );

        let mut r = record();
        r.login.clear();
        assert_eq!(
            b.build(&r, &mailbox(), &pw).unwrap_err(),
            CommandError::MissingLogin
        );
    }

    #[test]
    fn test_tool_debug_flag() {
        let mut b = builder(PasswordMode::Eval);
        b.tool_debug = true;
        let args = b.build(&record(), &mailbox(), &Plaintext::new("x")).unwrap().args;
        assert!(args.contains(&"-d".to_string()));
    }

    #[test]
    fn test_display_redacts_password() {
        let cmd = builder(PasswordMode::Eval)
            .build(&record(), &mailbox(), &Plaintext::new("secret"))
            .unwrap();
        let shown = cmd.to_string();
        assert!(!shown.contains("secret"));
        assert!(shown.ends_with("--passwordeval=<redacted>"));
        assert!(!format!("{:?}", cmd).contains("secret"));
    }

    #[test]
    fn test_quote_if_needed() {
        assert_eq!(quote_if_needed("alice@example.com"), "alice@example.com");
        assert_eq!(quote_if_needed("a b"), "'a b'");
        assert_eq!(quote_if_needed(""), "''");
    }
}
