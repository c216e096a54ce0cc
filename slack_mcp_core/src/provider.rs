//! User and channel caches.
//!
//! Two pipelines hydrate the caches at startup: load a JSON snapshot when one
//! parses, otherwise paginate live from the gateway, then persist. Each
//! collection publishes its primary and inverse map as one immutable pair, so
//! readers never observe a half-updated cache; readiness flags flip false to
//! true exactly once.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::limiter::TIER2_BOOST;
use crate::slack::gateway::SlackGateway;
use crate::slack::types::{User, WireChannel};

pub const ALL_CHANNEL_TYPES: &[&str] = &["mpim", "im", "public_channel", "private_channel"];

const USERS_PAGE_LIMIT: u32 = 1000;
const CHANNELS_PAGE_LIMIT: u32 = 999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Public,
    Private,
    Im,
    Mpim,
}

impl ChannelKind {
    pub fn from_type_str(s: &str) -> Option<Self> {
        match s {
            "public_channel" => Some(ChannelKind::Public),
            "private_channel" => Some(ChannelKind::Private),
            "im" => Some(ChannelKind::Im),
            "mpim" => Some(ChannelKind::Mpim),
            _ => None,
        }
    }
}

/// A conversation after rendering: `name` carries the `#`/`@` form served to
/// clients, DM/MPIM purposes are synthesized from the users cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub member_count: i64,
    pub kind: ChannelKind,
}

#[derive(Debug, Default, Clone)]
pub struct UsersIndex {
    pub users: HashMap<String, User>,
    /// handle -> id, rebuilt in lockstep with `users`.
    pub inverse: HashMap<String, String>,
}

impl UsersIndex {
    pub fn from_users(list: &[User]) -> Self {
        let mut index = UsersIndex::default();
        for user in list {
            index.inverse.insert(user.name.clone(), user.id.clone());
            index.users.insert(user.id.clone(), user.clone());
        }
        index
    }

    /// Resolve `(handle, real_name)` for an id, falling back to the raw id so
    /// rows are never null even while the cache hydrates.
    pub fn user_info(&self, user_id: &str) -> (String, String, bool) {
        match self.users.get(user_id) {
            Some(u) => (u.name.clone(), u.real_name.clone(), true),
            None => (user_id.to_string(), user_id.to_string(), false),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ChannelsIndex {
    pub channels: HashMap<String, Channel>,
    /// rendered name -> id, rebuilt in lockstep with `channels`.
    pub inverse: HashMap<String, String>,
}

impl ChannelsIndex {
    pub fn from_channels(list: &[Channel]) -> Self {
        let mut index = ChannelsIndex::default();
        for ch in list {
            index.inverse.insert(ch.name.clone(), ch.id.clone());
            index.channels.insert(ch.id.clone(), ch.clone());
        }
        index
    }
}

/// Render a wire channel into its served shape. IM and MPIM labels depend on
/// the users cache; unknown counterparties degrade to raw ids.
pub fn render_channel(wire: &WireChannel, users: &UsersIndex) -> Channel {
    let mut name = wire.name.clone();
    let mut purpose = wire.purpose.value.clone();
    let mut topic = wire.topic.value.clone();
    let mut member_count = wire.num_members;

    let kind = if wire.is_im {
        member_count = 2;
        match users.users.get(&wire.user) {
            Some(u) => {
                name = format!("@{}", u.name);
                purpose = format!("DM with {}", u.real_name);
            }
            None => {
                name = format!("@{}", wire.user);
                purpose = format!("DM with {}", wire.user);
            }
        }
        topic = String::new();
        ChannelKind::Im
    } else if wire.is_mpim {
        if !wire.members.is_empty() {
            member_count = wire.members.len() as i64;
            let names: Vec<String> = wire
                .members
                .iter()
                .map(|uid| match users.users.get(uid) {
                    Some(u) => u.real_name.clone(),
                    None => uid.clone(),
                })
                .collect();
            name = format!("@{}", wire.name_normalized);
            purpose = format!("Group DM with {}", names.join(", "));
            topic = String::new();
        }
        ChannelKind::Mpim
    } else {
        name = format!("#{}", wire.name_normalized);
        if wire.is_private {
            ChannelKind::Private
        } else {
            ChannelKind::Public
        }
    };

    Channel {
        id: wire.id.clone(),
        name,
        topic,
        purpose,
        member_count,
        kind,
    }
}

/// Filter cached channels down to the requested kinds.
pub fn filter_channels_by_kinds(index: &ChannelsIndex, kinds: &[ChannelKind]) -> Vec<Channel> {
    index
        .channels
        .values()
        .filter(|ch| kinds.contains(&ch.kind))
        .cloned()
        .collect()
}

/// Page through an id-sorted channel list. The cursor is the base64 of the
/// last id already served; comparison is lexicographic on the raw string.
pub fn paginate_channels(
    mut channels: Vec<Channel>,
    cursor: &str,
    limit: usize,
) -> (Vec<Channel>, String) {
    channels.sort_by(|a, b| a.id.cmp(&b.id));

    let mut start = 0;
    if !cursor.is_empty() {
        if let Ok(decoded) = BASE64.decode(cursor) {
            let last_id = String::from_utf8_lossy(&decoded).into_owned();
            start = channels
                .iter()
                .position(|ch| ch.id > last_id)
                .unwrap_or(channels.len());
        }
    }

    let end = (start + limit).min(channels.len());
    let page: Vec<Channel> = channels[start..end].to_vec();

    let next_cursor = if end < channels.len() && end > start {
        BASE64.encode(channels[end - 1].id.as_bytes())
    } else {
        String::new()
    };

    (page, next_cursor)
}

pub struct ApiProvider {
    gateway: SlackGateway,

    users: RwLock<Arc<UsersIndex>>,
    users_ready: AtomicBool,
    users_cache_path: PathBuf,

    channels: RwLock<Arc<ChannelsIndex>>,
    channels_ready: AtomicBool,
    channels_cache_path: PathBuf,
}

impl ApiProvider {
    pub fn new(gateway: SlackGateway, config: &Config) -> Self {
        Self {
            gateway,
            users: RwLock::new(Arc::new(UsersIndex::default())),
            users_ready: AtomicBool::new(false),
            users_cache_path: PathBuf::from(&config.users_cache),
            channels: RwLock::new(Arc::new(ChannelsIndex::default())),
            channels_ready: AtomicBool::new(false),
            channels_cache_path: PathBuf::from(&config.channels_cache),
        }
    }

    pub fn gateway(&self) -> &SlackGateway {
        &self.gateway
    }

    pub fn users_ready(&self) -> bool {
        self.users_ready.load(Ordering::Acquire)
    }

    pub fn channels_ready(&self) -> bool {
        self.channels_ready.load(Ordering::Acquire)
    }

    /// Users first: channel rendering depends on them, so their readiness is
    /// the stricter signal.
    pub fn is_ready(&self) -> Result<()> {
        if !self.users_ready() {
            return Err(Error::UsersNotReady);
        }
        if !self.channels_ready() {
            return Err(Error::ChannelsNotReady);
        }
        Ok(())
    }

    pub async fn users_index(&self) -> Arc<UsersIndex> {
        self.users.read().await.clone()
    }

    pub async fn channels_index(&self) -> Arc<ChannelsIndex> {
        self.channels.read().await.clone()
    }

    async fn publish_users(&self, index: UsersIndex) {
        *self.users.write().await = Arc::new(index);
        self.users_ready.store(true, Ordering::Release);
    }

    async fn publish_channels(&self, index: ChannelsIndex) {
        *self.channels.write().await = Arc::new(index);
        self.channels_ready.store(true, Ordering::Release);
    }

    /// Hydrate the users cache: snapshot, else live listing plus Slack
    /// Connect counterparties, then persist.
    pub async fn refresh_users(&self) -> Result<()> {
        if self.gateway.is_demo() {
            info!("demo credentials are set, users cache left empty");
            self.publish_users(UsersIndex::default()).await;
            return Ok(());
        }

        if let Some(cached) = load_snapshot::<User>(&self.users_cache_path) {
            info!(count = cached.len(), path = %self.users_cache_path.display(), "loaded users from cache");
            self.publish_users(UsersIndex::from_users(&cached)).await;
            return Ok(());
        }

        let mut list: Vec<User> = Vec::new();
        let lim = TIER2_BOOST.limiter();
        let mut cursor = String::new();
        loop {
            let (page, next) = self.gateway.list_users_page(USERS_PAGE_LIMIT, &cursor).await?;
            list.extend(page);
            if next.is_empty() {
                break;
            }
            cursor = next;
            lim.wait().await;
        }

        let connect = self.slack_connect_users(&list).await?;
        list.extend(connect);

        persist_snapshot(&self.users_cache_path, &list);
        info!(count = list.len(), path = %self.users_cache_path.display(), "cached users");
        self.publish_users(UsersIndex::from_users(&list)).await;
        Ok(())
    }

    /// Slack Connect DM counterparties never appear in the workspace user
    /// listing; the Edge boot payload is the only way to discover them.
    async fn slack_connect_users(&self, known: &[User]) -> Result<Vec<User>> {
        let boot = self.gateway.client_user_boot().await?;

        let known_ids: std::collections::HashSet<&str> =
            known.iter().map(|u| u.id.as_str()).collect();

        let missing: Vec<String> = boot
            .iter()
            .filter(|im| im.is_shared || im.is_ext_shared)
            .filter(|im| !im.user.is_empty() && !known_ids.contains(im.user.as_str()))
            .map(|im| im.user.clone())
            .collect();

        if missing.is_empty() {
            return Ok(Vec::new());
        }
        self.gateway.lookup_users(&missing).await
    }

    /// Hydrate the channels cache: snapshot, else the full live listing.
    pub async fn refresh_channels(&self) -> Result<()> {
        if self.gateway.is_demo() {
            info!("demo credentials are set, channels cache left empty");
            self.publish_channels(ChannelsIndex::default()).await;
            return Ok(());
        }

        if let Some(cached) = load_snapshot::<Channel>(&self.channels_cache_path) {
            info!(count = cached.len(), path = %self.channels_cache_path.display(), "loaded channels from cache");
            self.publish_channels(ChannelsIndex::from_channels(&cached))
                .await;
            return Ok(());
        }

        let users = self.users_index().await;
        let types = ALL_CHANNEL_TYPES.join(",");
        let lim = TIER2_BOOST.limiter();

        let mut channels: Vec<Channel> = Vec::new();
        let mut cursor = String::new();
        loop {
            // A failed page keeps what was collected so far; the cache is
            // still useful and the next restart retries from scratch.
            let (page, next) = match self
                .gateway
                .list_channels_page(&types, true, CHANNELS_PAGE_LIMIT, &cursor)
                .await
            {
                Ok(result) => result,
                Err(e) => {
                    error!(error = %e, "failed to fetch channels page");
                    break;
                }
            };

            channels.extend(page.iter().map(|wire| render_channel(wire, &users)));

            if next.is_empty() {
                break;
            }
            cursor = next;
            lim.wait().await;
        }

        persist_snapshot(&self.channels_cache_path, &channels);
        info!(count = channels.len(), path = %self.channels_cache_path.display(), "cached channels");
        self.publish_channels(ChannelsIndex::from_channels(&channels))
            .await;
        Ok(())
    }

    /// Normalize a channel reference to an id. `#…`/`@…` forms need the
    /// caches; raw ids pass through untouched.
    pub async fn resolve_channel_id(&self, reference: &str) -> Result<String> {
        if reference.trim().is_empty() {
            return Err(Error::BadRequest("channel_id must be a non-empty string".into()));
        }

        if !(reference.starts_with('#') || reference.starts_with('@')) {
            return Ok(reference.to_string());
        }

        self.is_ready()?;
        let index = self.channels_index().await;
        match index.inverse.get(reference) {
            Some(id) => Ok(id.clone()),
            None => Err(Error::NotFound(format!(
                "channel {reference:?} (not in synced cache; try removing the old cache file and restarting)"
            ))),
        }
    }

    /// Format a channel reference for the search DSL (`in:` filter).
    pub async fn format_channel_for_search(&self, raw: &str) -> Result<String> {
        let raw = raw.trim();
        self.is_ready()?;
        let index = self.channels_index().await;

        if raw.starts_with('#') {
            return match index.inverse.get(raw) {
                Some(id) => Ok(index.channels[id].name.clone()),
                None => Err(Error::NotFound(format!("channel {raw:?}"))),
            };
        }
        if raw.starts_with('C') {
            return match index.channels.get(raw) {
                Some(ch) => Ok(ch.name.clone()),
                None => Err(Error::NotFound(format!("channel {raw:?}"))),
            };
        }
        Err(Error::BadRequest(format!("invalid channel format: {raw:?}")))
    }

    /// Format a user reference for the search DSL (`from:`/`with:` filters).
    pub async fn format_user_for_search(&self, raw: &str) -> Result<String> {
        let raw = raw.trim();
        if raw.starts_with("<@") {
            return Ok(raw.to_string());
        }

        if !self.users_ready() {
            return Err(Error::UsersNotReady);
        }
        let index = self.users_index().await;

        if raw.starts_with('U') {
            return match index.users.get(raw) {
                Some(u) => Ok(format!("<@{}>", u.id)),
                None => Err(Error::NotFound(format!("user {raw:?}"))),
            };
        }

        let handle = raw.strip_prefix('@').unwrap_or(raw);
        match index.inverse.get(handle) {
            Some(id) => Ok(format!("@{}", index.users[id].name)),
            None => Err(Error::NotFound(format!("user {raw:?}"))),
        }
    }
}

fn load_snapshot<T: DeserializeOwned>(path: &Path) -> Option<Vec<T>> {
    let data = std::fs::read(path).ok()?;
    match serde_json::from_slice(&data) {
        Ok(list) => Some(list),
        Err(e) => {
            // A torn write from a killed process lands here too; the live
            // refresh repairs it.
            warn!(path = %path.display(), error = %e, "failed to parse cache snapshot, will refetch");
            None
        }
    }
}

fn persist_snapshot<T: Serialize>(path: &Path, list: &[T]) {
    match serde_json::to_vec_pretty(list) {
        Ok(data) => {
            if let Err(e) = std::fs::write(path, data) {
                warn!(path = %path.display(), error = %e, "failed to write cache snapshot");
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize cache snapshot"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slack::types::TopicOrPurpose;

    fn user(id: &str, name: &str, real_name: &str) -> User {
        User {
            id: id.into(),
            name: name.into(),
            real_name: real_name.into(),
        }
    }

    fn cached_channel(id: &str, name: &str, members: i64, kind: ChannelKind) -> Channel {
        Channel {
            id: id.into(),
            name: name.into(),
            topic: String::new(),
            purpose: String::new(),
            member_count: members,
            kind,
        }
    }

    #[test]
    fn public_channel_renders_hash_name() {
        let wire = WireChannel {
            id: "C1".into(),
            name: "General".into(),
            name_normalized: "general".into(),
            num_members: 42,
            topic: TopicOrPurpose { value: "t".into() },
            purpose: TopicOrPurpose { value: "p".into() },
            ..Default::default()
        };
        let ch = render_channel(&wire, &UsersIndex::default());
        assert_eq!(ch.name, "#general");
        assert_eq!(ch.kind, ChannelKind::Public);
        assert_eq!(ch.member_count, 42);
        assert_eq!(ch.topic, "t");
    }

    #[test]
    fn im_renders_counterparty_handle() {
        let users = UsersIndex::from_users(&[user("U1", "alice", "Alice Doe")]);
        let wire = WireChannel {
            id: "D1".into(),
            is_im: true,
            user: "U1".into(),
            ..Default::default()
        };
        let ch = render_channel(&wire, &users);
        assert_eq!(ch.name, "@alice");
        assert_eq!(ch.purpose, "DM with Alice Doe");
        assert_eq!(ch.member_count, 2);
        assert_eq!(ch.topic, "");
        assert_eq!(ch.kind, ChannelKind::Im);
    }

    #[test]
    fn im_falls_back_to_raw_id_without_users() {
        let wire = WireChannel {
            id: "D1".into(),
            is_im: true,
            user: "U9".into(),
            ..Default::default()
        };
        let ch = render_channel(&wire, &UsersIndex::default());
        assert_eq!(ch.name, "@U9");
        assert_eq!(ch.purpose, "DM with U9");
    }

    #[test]
    fn mpim_renders_group_label() {
        let users = UsersIndex::from_users(&[
            user("U1", "alice", "Alice Doe"),
            user("U2", "bob", "Bob Roe"),
        ]);
        let wire = WireChannel {
            id: "G1".into(),
            is_mpim: true,
            is_private: true,
            name_normalized: "mpdm-alice--bob-1".into(),
            members: vec!["U1".into(), "U2".into(), "U3".into()],
            ..Default::default()
        };
        let ch = render_channel(&wire, &users);
        assert_eq!(ch.name, "@mpdm-alice--bob-1");
        assert_eq!(ch.purpose, "Group DM with Alice Doe, Bob Roe, U3");
        assert_eq!(ch.member_count, 3);
        assert_eq!(ch.kind, ChannelKind::Mpim);
    }

    #[test]
    fn private_channel_kind_wins_over_public() {
        let wire = WireChannel {
            id: "G2".into(),
            name_normalized: "secret".into(),
            is_private: true,
            ..Default::default()
        };
        assert_eq!(
            render_channel(&wire, &UsersIndex::default()).kind,
            ChannelKind::Private
        );
    }

    #[test]
    fn inverse_maps_follow_primaries() {
        let index = ChannelsIndex::from_channels(&[
            cached_channel("C1", "#general", 10, ChannelKind::Public),
            cached_channel("C2", "#dev", 5, ChannelKind::Public),
        ]);
        assert_eq!(index.inverse["#general"], "C1");
        assert_eq!(index.channels["C2"].name, "#dev");
    }

    #[test]
    fn duplicate_names_keep_last_binding() {
        let index = ChannelsIndex::from_channels(&[
            cached_channel("C1", "#dup", 1, ChannelKind::Public),
            cached_channel("C2", "#dup", 2, ChannelKind::Public),
        ]);
        assert_eq!(index.inverse["#dup"], "C2");
        assert_eq!(index.channels.len(), 2);
    }

    #[test]
    fn pagination_is_deterministic() {
        let channels = vec![
            cached_channel("A3", "#c", 1, ChannelKind::Public),
            cached_channel("A1", "#a", 1, ChannelKind::Public),
            cached_channel("A2", "#b", 1, ChannelKind::Public),
        ];

        let (page, cursor) = paginate_channels(channels.clone(), "", 2);
        let ids: Vec<&str> = page.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["A1", "A2"]);
        assert_eq!(cursor, BASE64.encode("A2"));

        let (page, cursor) = paginate_channels(channels, &cursor, 2);
        let ids: Vec<&str> = page.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["A3"]);
        assert_eq!(cursor, "");
    }

    #[test]
    fn pagination_concatenation_equals_sorted_cache() {
        let channels: Vec<Channel> = (0..7)
            .map(|i| cached_channel(&format!("C{i}"), &format!("#c{i}"), i, ChannelKind::Public))
            .collect();

        let mut collected = Vec::new();
        let mut cursor = String::new();
        loop {
            let (page, next) = paginate_channels(channels.clone(), &cursor, 3);
            collected.extend(page.into_iter().map(|c| c.id));
            if next.is_empty() {
                break;
            }
            cursor = next;
        }

        let mut expected: Vec<String> = channels.iter().map(|c| c.id.clone()).collect();
        expected.sort();
        assert_eq!(collected, expected);
    }

    #[test]
    fn garbage_cursor_starts_from_the_beginning() {
        let channels = vec![cached_channel("A1", "#a", 1, ChannelKind::Public)];
        let (page, _) = paginate_channels(channels, "not-base64!", 10);
        assert_eq!(page.len(), 1);
    }

    #[test]
    fn filter_by_kinds() {
        let index = ChannelsIndex::from_channels(&[
            cached_channel("C1", "#a", 1, ChannelKind::Public),
            cached_channel("G1", "#b", 1, ChannelKind::Private),
            cached_channel("D1", "@c", 2, ChannelKind::Im),
        ]);
        let result = filter_channels_by_kinds(&index, &[ChannelKind::Public, ChannelKind::Im]);
        let mut ids: Vec<&str> = result.iter().map(|c| c.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["C1", "D1"]);
    }

    #[test]
    fn snapshot_roundtrip_and_torn_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channels.json");

        let channels = vec![cached_channel("C1", "#a", 1, ChannelKind::Public)];
        persist_snapshot(&path, &channels);
        let loaded: Vec<Channel> = load_snapshot(&path).unwrap();
        assert_eq!(loaded[0].id, "C1");

        std::fs::write(&path, &b"[{\"id\":\"C1\""[..]).unwrap();
        assert!(load_snapshot::<Channel>(&path).is_none());
    }

    #[test]
    fn user_info_falls_back_to_id() {
        let index = UsersIndex::from_users(&[user("U1", "alice", "Alice")]);
        assert_eq!(
            index.user_info("U1"),
            ("alice".to_string(), "Alice".to_string(), true)
        );
        assert_eq!(
            index.user_info("U404"),
            ("U404".to_string(), "U404".to_string(), false)
        );
    }
}
