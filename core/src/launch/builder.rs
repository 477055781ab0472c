//! LaunchCommandBuilder and launch parameter types.

use std::path::{Path, PathBuf};

use skirmish_shared::Faction;

use super::LaunchError;
use super::args::{quote, sanitize};

/// Where a replay comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplaySource {
    /// Local replay file
    File(PathBuf),
    /// Live or remote replay stream (e.g. `gpgnet://host:port/uid/name.scfareplay`)
    Uri(String),
}

impl ReplaySource {
    fn as_arg(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Uri(uri) => uri.clone(),
        }
    }
}

/// Validated argument vector for the game executable.
///
/// The first element is the executable. Values are raw (unquoted): the vector
/// is passed to the OS without a shell. Use [`command_line`](Self::command_line)
/// for a single quoted string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchParameters {
    argv: Vec<String>,
}

impl LaunchParameters {
    pub fn executable(&self) -> &str {
        &self.argv[0]
    }

    /// Everything after the executable.
    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn into_argv(self) -> Vec<String> {
        self.argv
    }

    /// Single-string form with values quoted per platform convention.
    pub fn command_line(&self) -> String {
        self.argv
            .iter()
            .map(|arg| quote(arg))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Whether a switch appears in the argument vector.
    pub fn has_switch(&self, switch: &str) -> bool {
        self.args().iter().any(|arg| arg == switch)
    }

    /// The first value following `switch`.
    pub fn switch_value(&self, switch: &str) -> Option<&str> {
        let args = self.args();
        args.iter()
            .position(|arg| arg == switch)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }
}

/// Builder for the game's command line.
///
/// # Examples
///
/// ```ignore
/// let params = LaunchCommandBuilder::new()
///     .executable("/games/fa/bin/ForgedAlliance.exe")
///     .uid(1234)
///     .username("alice")
///     .map("scmp_009")
///     .local_relay_port(7237)
///     .build()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct LaunchCommandBuilder {
    executable: Option<PathBuf>,
    init_file: Option<String>,
    uid: Option<u32>,
    username: Option<String>,
    country: Option<String>,
    clan: Option<String>,
    mean: Option<f64>,
    deviation: Option<f64>,
    faction: Option<Faction>,
    expected_players: Option<u32>,
    team: Option<u32>,
    map_position: Option<u32>,
    map: Option<String>,
    log_file: Option<PathBuf>,
    local_relay_port: Option<u16>,
    local_replay_port: Option<u16>,
    replay: Option<ReplaySource>,
    replay_id: Option<u32>,
    rehost: bool,
    division: Option<String>,
    subdivision: Option<String>,
    console_port: Option<u16>,
    launch_server_port: Option<u16>,
    server_args: Vec<String>,
    additional_args: Vec<String>,
}

impl LaunchCommandBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executable(mut self, path: impl AsRef<Path>) -> Self {
        self.executable = Some(path.as_ref().to_path_buf());
        self
    }

    /// Lua init file selecting the featured mod's file set.
    pub fn init_file(mut self, file: impl Into<String>) -> Self {
        self.init_file = Some(file.into());
        self
    }

    /// Game uid (online games only); names the captured replay stream.
    pub fn uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn clan(mut self, clan: impl Into<String>) -> Self {
        self.clan = Some(clan.into());
        self
    }

    /// Rating mean and deviation.
    pub fn rating(mut self, mean: f64, deviation: f64) -> Self {
        self.mean = Some(mean);
        self.deviation = Some(deviation);
        self
    }

    pub fn faction(mut self, faction: Faction) -> Self {
        self.faction = Some(faction);
        self
    }

    pub fn expected_players(mut self, count: u32) -> Self {
        self.expected_players = Some(count);
        self
    }

    pub fn team(mut self, team: u32) -> Self {
        self.team = Some(team);
        self
    }

    pub fn map_position(mut self, position: u32) -> Self {
        self.map_position = Some(position);
        self
    }

    pub fn map(mut self, map: impl Into<String>) -> Self {
        self.map = Some(map.into());
        self
    }

    pub fn log_file(mut self, path: impl AsRef<Path>) -> Self {
        self.log_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Port of the peer-connectivity relay the game talks GPGNet to.
    pub fn local_relay_port(mut self, port: u16) -> Self {
        self.local_relay_port = Some(port);
        self
    }

    /// Port of the local replay capture server.
    pub fn local_replay_port(mut self, port: u16) -> Self {
        self.local_replay_port = Some(port);
        self
    }

    pub fn replay(mut self, source: ReplaySource) -> Self {
        self.replay = Some(source);
        self
    }

    pub fn replay_id(mut self, id: u32) -> Self {
        self.replay_id = Some(id);
        self
    }

    pub fn rehost(mut self, rehost: bool) -> Self {
        self.rehost = rehost;
        self
    }

    pub fn division(mut self, division: impl Into<String>) -> Self {
        self.division = Some(division.into());
        self
    }

    pub fn subdivision(mut self, subdivision: impl Into<String>) -> Self {
        self.subdivision = Some(subdivision.into());
        self
    }

    pub fn console_port(mut self, port: u16) -> Self {
        self.console_port = Some(port);
        self
    }

    pub fn launch_server_port(mut self, port: u16) -> Self {
        self.launch_server_port = Some(port);
        self
    }

    /// Free-form switches; anything not on the allow-list is dropped.
    pub fn additional_args(mut self, args: &str) -> Self {
        self.additional_args.extend(sanitize(args));
        self
    }

    /// Switches chosen by the server, passed through unfiltered.
    pub fn server_args<I>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        self.server_args.extend(tokens);
        self
    }

    /// Validate and produce the argument vector.
    pub fn build(self) -> Result<LaunchParameters, LaunchError> {
        let executable = self
            .executable
            .as_ref()
            .filter(|path| !path.as_os_str().is_empty())
            .ok_or(LaunchError::MissingExecutable)?;
        if self.replay.is_some() && self.uid.is_some() {
            return Err(LaunchError::ReplayWithUid);
        }
        if self.uid.is_some() && self.username.is_none() {
            return Err(LaunchError::UidWithoutUsername);
        }

        let mut argv = vec![executable.display().to_string()];
        let mut push = |switch: &str, value: Option<String>| {
            if let Some(value) = value {
                argv.push(switch.to_string());
                argv.push(value);
            }
        };

        push("/init", self.init_file.clone());
        push("/faction", self.faction.map(|f| f.as_str().to_string()));
        push("/mean", self.mean.map(|m| m.to_string()));
        push("/deviation", self.deviation.map(|d| d.to_string()));
        push("/country", self.country.clone());
        push("/clan", self.clan.clone());
        push("/players", self.expected_players.map(|n| n.to_string()));
        push("/team", self.team.map(|t| t.to_string()));
        push("/startspot", self.map_position.map(|p| p.to_string()));
        push("/name", self.username.clone());
        push(
            "/gpgnet",
            self.local_relay_port.map(|port| format!("127.0.0.1:{}", port)),
        );
        push("/savereplay", self.save_replay_uri());
        push("/replay", self.replay.as_ref().map(ReplaySource::as_arg));
        push("/replayid", self.replay_id.map(|id| id.to_string()));
        push("/map", self.map.clone());
        push("/log", self.log_file.as_ref().map(|p| p.display().to_string()));
        push("/consoleport", self.console_port.map(|p| p.to_string()));
        push("/launchserver", self.launch_server_port.map(|p| p.to_string()));
        push("/division", self.division.clone());
        push("/subdivision", self.subdivision.clone());

        if self.rehost {
            argv.push("/rehost".to_string());
        }
        argv.extend(self.server_args);
        argv.extend(self.additional_args);

        Ok(LaunchParameters { argv })
    }

    /// Replay capture URI; only for online games with a known player.
    fn save_replay_uri(&self) -> Option<String> {
        let port = self.local_replay_port?;
        let uid = self.uid?;
        let username = self.username.as_deref()?;
        Some(format!(
            "gpgnet://127.0.0.1:{}/{}/{}.scfareplay",
            port, uid, username
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> LaunchCommandBuilder {
        LaunchCommandBuilder::new().executable("/games/fa/bin/ForgedAlliance.exe")
    }

    #[test]
    fn test_missing_executable() {
        let result = LaunchCommandBuilder::new().uid(1).username("alice").build();
        assert_eq!(result, Err(LaunchError::MissingExecutable));
    }

    #[test]
    fn test_empty_executable_is_missing() {
        let result = LaunchCommandBuilder::new().executable("").build();
        assert_eq!(result, Err(LaunchError::MissingExecutable));
    }

    #[test]
    fn test_replay_and_uid_are_exclusive() {
        let result = base()
            .uid(1)
            .username("alice")
            .replay(ReplaySource::File(PathBuf::from("game.scfareplay")))
            .build();
        assert_eq!(result, Err(LaunchError::ReplayWithUid));
    }

    #[test]
    fn test_uid_requires_username() {
        assert_eq!(base().uid(1).build(), Err(LaunchError::UidWithoutUsername));
    }

    #[test]
    fn test_minimal_command_is_just_the_executable() {
        let params = base().build().unwrap();
        assert_eq!(params.executable(), "/games/fa/bin/ForgedAlliance.exe");
        assert!(params.args().is_empty());
    }

    #[test]
    fn test_online_arguments() {
        let params = base()
            .uid(42)
            .username("alice")
            .faction(Faction::Aeon)
            .team(2)
            .expected_players(4)
            .map_position(3)
            .map("scmp_009")
            .local_relay_port(7237)
            .local_replay_port(15000)
            .console_port(4000)
            .rating(1500.0, 75.5)
            .build()
            .unwrap();

        assert_eq!(params.switch_value("/name"), Some("alice"));
        assert_eq!(params.switch_value("/faction"), Some("aeon"));
        assert_eq!(params.switch_value("/team"), Some("2"));
        assert_eq!(params.switch_value("/players"), Some("4"));
        assert_eq!(params.switch_value("/startspot"), Some("3"));
        assert_eq!(params.switch_value("/map"), Some("scmp_009"));
        assert_eq!(params.switch_value("/gpgnet"), Some("127.0.0.1:7237"));
        assert_eq!(params.switch_value("/consoleport"), Some("4000"));
        assert_eq!(params.switch_value("/mean"), Some("1500"));
        assert_eq!(params.switch_value("/deviation"), Some("75.5"));
        assert_eq!(
            params.switch_value("/savereplay"),
            Some("gpgnet://127.0.0.1:15000/42/alice.scfareplay")
        );
        assert!(!params.has_switch("/rehost"));
    }

    #[test]
    fn test_optional_flags_absent_when_unset() {
        let params = base().map("scmp_009").build().unwrap();
        for switch in ["/name", "/gpgnet", "/savereplay", "/replay", "/team", "/rehost"] {
            assert!(!params.has_switch(switch), "{} should be absent", switch);
        }
    }

    #[test]
    fn test_replay_port_without_uid_has_no_savereplay() {
        let params = base().local_replay_port(15000).build().unwrap();
        assert!(!params.has_switch("/savereplay"));
    }

    #[test]
    fn test_replay_arguments() {
        let params = base()
            .replay(ReplaySource::Uri(
                "gpgnet://replay.example.org:15000/99/live.scfareplay".to_string(),
            ))
            .replay_id(99)
            .build()
            .unwrap();
        assert_eq!(
            params.switch_value("/replay"),
            Some("gpgnet://replay.example.org:15000/99/live.scfareplay")
        );
        assert_eq!(params.switch_value("/replayid"), Some("99"));
    }

    #[test]
    fn test_rehost_flag_and_filtered_extras() {
        let params = base()
            .rehost(true)
            .additional_args("/nomovie /exec payload.lua")
            .build()
            .unwrap();
        assert_eq!(params.args(), &["/rehost", "/nomovie"]);
    }

    #[test]
    fn test_server_args_precede_user_extras() {
        let params = base()
            .additional_args("/showlog /unknown value")
            .server_args(vec!["/numgames".to_string(), "3".to_string()])
            .build()
            .unwrap();
        assert_eq!(params.args(), &["/numgames", "3", "/showlog"]);
    }

    #[cfg(not(windows))]
    #[test]
    fn test_command_line_quotes_spaces() {
        let params = LaunchCommandBuilder::new()
            .executable("/games/Forged Alliance/bin/game.exe")
            .map("scmp_009")
            .build()
            .unwrap();
        assert_eq!(
            params.command_line(),
            "'/games/Forged Alliance/bin/game.exe' /map scmp_009"
        );
    }
}
