/// External processes: the media player, the BBS browser, the notifier
/// command and the local PeerCast instance.
///
/// Launches are fire-and-forget.  The child's stdout/stderr are drained
/// into the log line by line and its exit status is logged when it ends;
/// nothing is reported back to the caller beyond a spawn failure.
use std::process::Stdio;

use epcyp_proto::channel::Channel;
use epcyp_proto::config::{PeercastConfig, PlayerConfig};
use epcyp_proto::platform;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Placeholder in the player argument template.
const URL_PLACEHOLDER: &str = "$x";

// ── spawning ──────────────────────────────────────────────────────────────────

fn spawn_logged(program: &str, args: &[String]) -> std::io::Result<Child> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let label = program_label(program);
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(drain_output(stdout, label.clone(), false));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(drain_output(stderr, label, true));
    }
    Ok(child)
}

async fn drain_output<R: AsyncRead + Unpin>(stream: R, label: String, is_stderr: bool) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_stderr {
            warn!("[{}] {}", label, line);
        } else {
            debug!("[{}] {}", label, line);
        }
    }
}

fn program_label(program: &str) -> String {
    std::path::Path::new(program)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string())
}

/// Start `program` and forget about it.  Must be called inside the runtime.
pub fn launch(program: &str, args: &[String]) {
    info!("launch: {} {:?}", program, args);
    match spawn_logged(program, args) {
        Ok(mut child) => {
            let label = program_label(program);
            tokio::spawn(async move {
                match child.wait().await {
                    Ok(status) if status.success() => debug!("[{}] exited", label),
                    Ok(status) => warn!("[{}] exited with {}", label, status),
                    Err(e) => warn!("[{}] wait failed: {}", label, e),
                }
            });
        }
        Err(e) => warn!("launch: cannot start {}: {}", program, e),
    }
}

/// Split an argument template the way a shell would for the simple cases:
/// whitespace separates words, single or double quotes group them.
pub fn split_args(template: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;

    for c in template.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_word = true;
            }
            None if c.is_whitespace() => {
                if in_word {
                    args.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            None => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        args.push(current);
    }
    args
}

// ── player / BBS ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Launcher {
    player: PlayerConfig,
    peercast_port: u16,
    via_open: bool,
}

impl Launcher {
    pub fn new(player: PlayerConfig, peercast_port: u16) -> Self {
        Self {
            player,
            peercast_port,
            via_open: platform::launches_via_open(),
        }
    }

    /// Program and arguments that play `channel`, or `None` when no player
    /// is configured.
    pub fn player_command(&self, channel: &Channel) -> Option<(String, Vec<String>)> {
        if self.player.path.is_empty() {
            return None;
        }
        let url = channel.stream_url(self.peercast_port);
        let mut args: Vec<String> = split_args(&self.player.args)
            .into_iter()
            .map(|arg| arg.replace(URL_PLACEHOLDER, &url))
            .collect();
        if args.is_empty() {
            args.push(url);
        }
        Some(self.wrap(&self.player.path, args))
    }

    /// Program and arguments that open the channel's contact URL.
    pub fn bbs_command(&self, channel: &Channel) -> Option<(String, Vec<String>)> {
        if channel.url.is_empty() {
            return None;
        }
        if self.player.bbs.is_empty() {
            return Some(default_opener(&channel.url));
        }
        Some(self.wrap(&self.player.bbs, vec![channel.url.clone()]))
    }

    pub fn play(&self, channel: &Channel) {
        match self.player_command(channel) {
            Some((program, args)) => {
                info!("play: {} ({})", channel.name, channel.id);
                launch(&program, &args);
            }
            None => warn!("play: no player configured"),
        }
    }

    pub fn open_bbs(&self, channel: &Channel) {
        match self.bbs_command(channel) {
            Some((program, args)) => launch(&program, &args),
            None => warn!("bbs: {} has no contact URL", channel.name),
        }
    }

    /// macOS application bundles are started through `open -a`.
    fn wrap(&self, program: &str, args: Vec<String>) -> (String, Vec<String>) {
        if !self.via_open {
            return (program.to_string(), args);
        }
        let mut wrapped = vec!["-a".to_string(), program.to_string()];
        wrapped.extend(args);
        ("open".to_string(), wrapped)
    }
}

fn default_opener(url: &str) -> (String, Vec<String>) {
    let program = if cfg!(target_os = "macos") {
        "open"
    } else if cfg!(windows) {
        "explorer"
    } else {
        "xdg-open"
    };
    (program.to_string(), vec![url.to_string()])
}

// ── PeerCast ──────────────────────────────────────────────────────────────────

/// Local PeerCast started alongside the daemon.
pub struct PeercastProcess {
    child: Option<Child>,
}

impl PeercastProcess {
    /// Start PeerCast if a path is configured.  A failure is logged and the
    /// daemon keeps running without it.
    pub fn start(config: &PeercastConfig) -> Self {
        if config.path.is_empty() {
            return Self { child: None };
        }
        let (program, args) = if config.use_mono {
            ("mono".to_string(), vec![config.path.clone()])
        } else {
            (config.path.clone(), Vec::new())
        };
        info!("peercast: starting {} {:?}", program, args);
        match spawn_logged(&program, &args) {
            Ok(child) => Self { child: Some(child) },
            Err(e) => {
                warn!("peercast: cannot start {}: {}", program, e);
                Self { child: None }
            }
        }
    }

    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => child.try_wait().ok().flatten().is_none(),
            None => false,
        }
    }

    pub async fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            info!("peercast: stopping");
            if let Err(e) = child.kill().await {
                warn!("peercast: kill failed: {}", e);
            }
        }
    }
}
