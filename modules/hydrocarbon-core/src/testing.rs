//! In-memory `Store` double, gated behind the `test-support` feature.
//!
//! Lets the Worker Pool, Scheduler, and Scrape Runner be exercised
//! end-to-end in tests with no database, mirroring the atomic-claim and
//! dedup contracts a real store must uphold.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use hydrocarbon_common::{
    Fact, Feed, Folder, HydrocarbonError, PostFact, PostRecord, Result, Scrape, ScrapeCounters,
    ScrapeSchedule, ScrapeState, ScheduleRequest,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::store::Store;

#[derive(Default)]
struct State {
    feeds: HashMap<Uuid, Feed>,
    folders: HashMap<Uuid, Folder>,
    scrapes: HashMap<Uuid, Scrape>,
    posts: HashMap<Uuid, PostRecord>,
    posts_by_hash: HashMap<String, Uuid>,
    posts_by_feed: HashMap<Uuid, Vec<PostFact>>,
    read_statuses: HashSet<(Uuid, Uuid)>,
    users_by_email: HashMap<String, Uuid>,
    login_tokens: HashMap<String, Uuid>,
    sessions: HashMap<String, Uuid>,
}

/// A single-process, in-memory stand-in for the Postgres-backed store.
/// Not safe to share across processes; only its atomicity under
/// concurrent in-process callers matters, via the inner mutex.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_feed(&self, feed: Feed) {
        self.state.lock().await.feeds.insert(feed.id, feed);
    }

    pub async fn seed_scrape(&self, scrape: Scrape) {
        self.state.lock().await.scrapes.insert(scrape.id, scrape);
    }

    pub async fn seed_session(&self, key: &str, user_id: Uuid) {
        self.state.lock().await.sessions.insert(key.to_string(), user_id);
    }

    pub async fn scrape(&self, id: Uuid) -> Option<Scrape> {
        self.state.lock().await.scrapes.get(&id).cloned()
    }

    pub async fn post_count(&self) -> usize {
        self.state.lock().await.posts_by_hash.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn start_scrapes(&self, limit: i64) -> Result<Vec<Scrape>> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let mut eligible: Vec<Uuid> = state
            .scrapes
            .values()
            .filter(|s| s.state == ScrapeState::Waiting && s.scheduled_start_at <= now && s.errors.len() < 3)
            .map(|s| s.id)
            .collect();

        eligible.sort_by_key(|id| state.scrapes[id].scheduled_start_at);
        eligible.truncate(limit.max(0) as usize);

        let mut claimed = Vec::with_capacity(eligible.len());
        for id in eligible {
            let scrape = state.scrapes.get_mut(&id).expect("eligible id must exist");
            scrape.state = ScrapeState::Running;
            scrape.started_at = Some(now);
            claimed.push(scrape.clone());
        }
        Ok(claimed)
    }

    async fn end_scrape(
        &self,
        id: Uuid,
        state: ScrapeState,
        counters: ScrapeCounters,
        error: Option<String>,
    ) -> Result<()> {
        let mut guard = self.state.lock().await;
        if let Some(scrape) = guard.scrapes.get_mut(&id) {
            scrape.state = state;
            scrape.ended_at = Some(Utc::now());
            scrape.total_datums = counters.total_datums;
            scrape.total_retries = counters.total_retries;
            scrape.total_tasks = counters.total_tasks;
            if let Some(message) = error {
                scrape.errors.push(message);
            }
        }
        Ok(())
    }

    async fn find_missing_schedules(&self, limit: i64, history_limit: i64) -> Result<Vec<ScheduleRequest>> {
        let state = self.state.lock().await;

        let mut requests = Vec::new();
        for feed in state.feeds.values() {
            let has_waiting = state
                .scrapes
                .values()
                .any(|s| s.feed_id == feed.id && s.state == ScrapeState::Waiting);
            if has_waiting {
                continue;
            }

            let mut recent_scrapes: Vec<Scrape> =
                state.scrapes.values().filter(|s| s.feed_id == feed.id).cloned().collect();
            recent_scrapes.sort_by_key(|s| std::cmp::Reverse(s.created_at));
            recent_scrapes.truncate(history_limit.max(0) as usize);

            let mut recent_posts = state.posts_by_feed.get(&feed.id).cloned().unwrap_or_default();
            recent_posts.sort_by_key(|p| std::cmp::Reverse(p.posted_at));
            recent_posts.truncate(history_limit.max(0) as usize);

            requests.push(ScheduleRequest { feed: feed.clone(), recent_scrapes, recent_posts });
            if requests.len() as i64 >= limit {
                break;
            }
        }
        Ok(requests)
    }

    async fn insert_schedule(&self, feed_id: Uuid, plugin: &str, schedules: &[ScrapeSchedule]) -> Result<()> {
        let mut state = self.state.lock().await;
        for proposal in schedules {
            let duplicate = state.scrapes.values().any(|s| {
                s.feed_id == feed_id && s.plugin == plugin && s.scheduled_start_at == proposal.scheduled_start_at
            });
            if duplicate {
                continue;
            }
            let scrape =
                Scrape::new_waiting(feed_id, plugin.to_string(), proposal.config.clone(), proposal.scheduled_start_at);
            state.scrapes.insert(scrape.id, scrape);
        }
        Ok(())
    }

    async fn list_scrapes(&self, state_filter: Option<ScrapeState>, limit: i64, offset: i64) -> Result<Vec<Scrape>> {
        let state = self.state.lock().await;
        let mut scrapes: Vec<Scrape> = state
            .scrapes
            .values()
            .filter(|s| state_filter.map(|f| f == s.state).unwrap_or(true))
            .cloned()
            .collect();
        scrapes.sort_by_key(|s| std::cmp::Reverse(s.created_at));
        let offset = offset.max(0) as usize;
        let limit = limit.max(0) as usize;
        Ok(scrapes.into_iter().skip(offset).take(limit).collect())
    }

    async fn write_fact(&self, scrape_id: Uuid, fact: Fact) -> Result<()> {
        let mut state = self.state.lock().await;
        let Fact::Post(post) = fact;
        let hash = post.content_hash();

        let feed_id = match state.scrapes.get(&scrape_id).map(|s| s.feed_id) {
            Some(feed_id) => feed_id,
            None => return Ok(()),
        };

        if let Some(existing_id) = state.posts_by_hash.get(&hash).copied() {
            if let Some(existing) = state.posts.get(&existing_id) {
                if existing.url == post.url {
                    return Ok(());
                }
            }
        }

        let record = PostRecord {
            id: Uuid::new_v4(),
            feed_id,
            title: post.title.clone(),
            author: post.author.clone(),
            body: post.body.clone(),
            url: post.url.clone(),
            posted_at: post.posted_at,
            read_at: None,
        };
        state.posts_by_hash.insert(hash, record.id);
        state.posts.insert(record.id, record);
        state.posts_by_feed.entry(feed_id).or_default().push(post);
        Ok(())
    }

    async fn verify_key(&self, key: &str) -> Result<Option<Uuid>> {
        Ok(self.state.lock().await.sessions.get(key).copied())
    }

    async fn create_login_token(&self, email: &str) -> Result<String> {
        let mut state = self.state.lock().await;
        let user_id = *state.users_by_email.entry(email.to_string()).or_insert_with(Uuid::new_v4);
        let token = Uuid::new_v4().to_string();
        state.login_tokens.insert(token.clone(), user_id);
        Ok(token)
    }

    async fn create_session(&self, token: &str) -> Result<String> {
        let mut state = self.state.lock().await;
        let user_id = *state
            .login_tokens
            .get(token)
            .ok_or_else(|| HydrocarbonError::Validation("unknown or expired login token".into()))?;
        let key = Uuid::new_v4().to_string();
        state.sessions.insert(key.clone(), user_id);
        Ok(key)
    }

    async fn list_feeds(&self, user_id: Uuid) -> Result<Vec<Feed>> {
        Ok(self.state.lock().await.feeds.values().filter(|f| f.user_id == user_id).cloned().collect())
    }

    async fn create_feed(&self, user_id: Uuid, title: String, plugin: String, url: String) -> Result<Feed> {
        let feed = Feed { id: Uuid::new_v4(), user_id, title, plugin, url };
        self.state.lock().await.feeds.insert(feed.id, feed.clone());
        Ok(feed)
    }

    async fn remove_feed(&self, user_id: Uuid, feed_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.feeds.get(&feed_id).map(|f| f.user_id) == Some(user_id) {
            state.feeds.remove(&feed_id);
        }
        Ok(())
    }

    async fn list_folders(&self, user_id: Uuid) -> Result<Vec<Folder>> {
        Ok(self.state.lock().await.folders.values().filter(|f| f.user_id == user_id).cloned().collect())
    }

    async fn create_folder(&self, user_id: Uuid, name: String) -> Result<Folder> {
        let folder = Folder { id: Uuid::new_v4(), user_id, name };
        self.state.lock().await.folders.insert(folder.id, folder.clone());
        Ok(folder)
    }

    async fn list_posts(&self, user_id: Uuid, feed_id: Option<Uuid>, limit: i64, offset: i64) -> Result<Vec<PostRecord>> {
        let state = self.state.lock().await;
        let owned_feeds: HashSet<Uuid> =
            state.feeds.values().filter(|f| f.user_id == user_id).map(|f| f.id).collect();

        let mut posts: Vec<PostRecord> = state
            .posts
            .values()
            .filter(|p| owned_feeds.contains(&p.feed_id) && feed_id.map(|f| f == p.feed_id).unwrap_or(true))
            .map(|p| with_read_state(p.clone(), &state.read_statuses, user_id))
            .collect();

        posts.sort_by_key(|p| std::cmp::Reverse(p.posted_at));
        let offset = offset.max(0) as usize;
        let limit = limit.max(0) as usize;
        Ok(posts.into_iter().skip(offset).take(limit).collect())
    }

    async fn get_post(&self, user_id: Uuid, post_id: Uuid) -> Result<Option<PostRecord>> {
        let state = self.state.lock().await;
        let Some(post) = state.posts.get(&post_id) else { return Ok(None) };
        let owns = state.feeds.get(&post.feed_id).map(|f| f.user_id) == Some(user_id);
        if !owns {
            return Ok(None);
        }
        Ok(Some(with_read_state(post.clone(), &state.read_statuses, user_id)))
    }

    async fn mark_post_read(&self, user_id: Uuid, post_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        state.read_statuses.insert((user_id, post_id));
        Ok(())
    }
}

fn with_read_state(mut post: PostRecord, read_statuses: &HashSet<(Uuid, Uuid)>, user_id: Uuid) -> PostRecord {
    if read_statuses.contains(&(user_id, post.id)) {
        post.read_at = Some(Utc::now());
    }
    post
}
