//! Node configuration for a new setup
//!
//! Initialises the node home with the daemon's own `init`, replaces the
//! generated genesis with the chain's published one, and edits config.toml
//! and app.toml in place. Edits are scoped to a TOML table and replace the
//! whole `key = ...` line, leaving comments and layout untouched.

use crate::Change;
use crate::Host;
use installer_common::fsutil::{self, remove_path, Owner};
use installer_common::{
    CommandSpec, Configuration, DirectoryLayout, InstallError, IoContext, Result,
};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

pub const GENESIS_FILE: &str = "genesis.json";
pub const SEEDS_FILE: &str = "seeds.txt";

/// Set `key` inside `[section]` (None = top-level keys before the first table)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TomlEdit {
    pub section: Option<&'static str>,
    pub key: &'static str,
    /// TOML literal, already quoted where needed
    pub value: String,
}

impl TomlEdit {
    fn string(section: Option<&'static str>, key: &'static str, value: &str) -> Self {
        Self {
            section,
            key,
            value: toml::Value::String(value.to_string()).to_string(),
        }
    }

    fn literal(section: Option<&'static str>, key: &'static str, value: &str) -> Self {
        Self {
            section,
            key,
            value: value.to_string(),
        }
    }

    fn line(&self) -> String {
        format!("{} = {}", self.key, self.value)
    }
}

/// Edits to config.toml; `seeds` is the chain's published seed list
pub fn config_toml_edits(config: &Configuration, seeds: &str) -> Vec<TomlEdit> {
    let node = &config.node;
    let mut edits = vec![
        TomlEdit::string(None, "log_level", &node.log_level),
        TomlEdit::string(None, "log_format", &node.log_format),
        TomlEdit::string(
            Some("rpc"),
            "laddr",
            &format!("tcp://0.0.0.0:{}", node.rpc_port),
        ),
        TomlEdit::string(
            Some("p2p"),
            "laddr",
            &format!("tcp://0.0.0.0:{}", node.p2p_port),
        ),
        TomlEdit::string(Some("p2p"), "seeds", seeds),
        TomlEdit::literal(Some("consensus"), "create_empty_blocks", "false"),
    ];
    if !node.external_address.is_empty() {
        edits.push(TomlEdit::string(
            Some("p2p"),
            "external_address",
            &format!("{}:{}", node.external_address, node.p2p_port),
        ));
    }
    if !node.persistent_peers.is_empty() {
        edits.push(TomlEdit::string(
            Some("p2p"),
            "persistent_peers",
            &node.persistent_peers,
        ));
    }
    edits
}

pub fn app_toml_edits(config: &Configuration) -> Vec<TomlEdit> {
    vec![TomlEdit::string(
        None,
        "minimum-gas-prices",
        &config.node.gas_price,
    )]
}

fn section_header(line: &str) -> Option<&str> {
    let t = line.trim();
    if t.starts_with("[[") {
        return Some(t.trim_matches(|c| c == '[' || c == ']').trim());
    }
    t.strip_prefix('[')
        .and_then(|rest| rest.split_once(']'))
        .map(|(name, _)| name.trim())
}

fn assigns(line: &str, key: &str) -> bool {
    line.trim_start()
        .strip_prefix(key)
        .map(|rest| rest.trim_start().starts_with('='))
        .unwrap_or(false)
}

/// Apply edits; returns the new content and the keys that were not found
pub fn apply_edits<'e>(content: &str, edits: &'e [TomlEdit]) -> (String, Vec<&'e TomlEdit>) {
    let mut found = vec![false; edits.len()];
    let mut section: Option<String> = None;
    let mut out = Vec::new();

    for line in content.lines() {
        if let Some(name) = section_header(line) {
            section = Some(name.to_string());
            out.push(line.to_string());
            continue;
        }
        let hit = edits.iter().position(|e| {
            e.section == section.as_deref() && assigns(line, e.key)
        });
        match hit {
            Some(i) => {
                found[i] = true;
                let indent = &line[..line.len() - line.trim_start().len()];
                out.push(format!("{}{}", indent, edits[i].line()));
            }
            None => out.push(line.to_string()),
        }
    }

    let missing = edits
        .iter()
        .zip(found)
        .filter(|(_, f)| !f)
        .map(|(e, _)| e)
        .collect();
    let mut rendered = out.join("\n");
    if content.ends_with('\n') {
        rendered.push('\n');
    }
    (rendered, missing)
}

/// Edit a file in place; a missing file is a precondition failure
pub fn edit_file(path: &Path, edits: &[TomlEdit]) -> Result<Change> {
    if !path.is_file() {
        return Err(InstallError::MissingPrecondition {
            path: path.to_path_buf(),
        });
    }
    let content = fs::read_to_string(path).at(path)?;
    let (updated, missing) = apply_edits(&content, edits);
    for edit in missing {
        warn!(
            "{}: no `{}` in [{}], left unset",
            path.display(),
            edit.key,
            edit.section.unwrap_or("top level")
        );
    }
    if updated == content {
        debug!("{} already up to date", path.display());
        return Ok(Change::Unchanged);
    }
    fs::write(path, updated).at(path)?;
    info!("Updated {}", path.display());
    Ok(Change::Applied)
}

/// `<daemon> init` as the service user and the chain genesis, when the node
/// has no genesis yet
pub fn init_node(host: Host<'_>, config: &Configuration, layout: &DirectoryLayout) -> Result<Change> {
    let genesis = layout.genesis_file();
    if genesis.exists() {
        debug!("{} exists, node already initialised", genesis.display());
        return Ok(Change::Unchanged);
    }

    let daemon = config.paths.installed_binary(&config.binary_name);
    let root = layout.root.display().to_string();
    info!("Initialising node {} on {}", config.node.moniker, config.chain);
    host.exec.run_checked(
        &CommandSpec::new(daemon.display().to_string())
            .args([
                "init",
                config.node.moniker.as_str(),
                "--chain-id",
                config.chain.chain_id(),
                "--home",
                root.as_str(),
            ])
            .as_user(&config.service_user),
    )?;

    // init may have written a placeholder genesis; the download must not resume onto it
    remove_path(&genesis)?;
    host.remote.download(
        &config.sources.network_file_url(config.chain, GENESIS_FILE),
        &genesis,
    )?;
    fsutil::chown(host.exec, &genesis, &Owner::service(&config.service_user), false)?;
    Ok(Change::Applied)
}

pub fn configure(host: Host<'_>, config: &Configuration, layout: &DirectoryLayout) -> Result<Change> {
    let mut change = init_node(host, config, layout)?;

    let seeds = host
        .remote
        .fetch_text(&config.sources.network_file_url(config.chain, SEEDS_FILE))?;
    change = change.merge(edit_file(
        &layout.config_toml(),
        &config_toml_edits(config, seeds.trim()),
    )?);
    change = change.merge(edit_file(&layout.app_toml(), &app_toml_edits(config))?);
    Ok(change)
}
