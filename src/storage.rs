//! In-memory social graph storage.
//!
//! Holds every user ever registered, their friendships and the posts made
//! to them. The store is owned by the event loop thread, so no locking is
//! needed. Users and posts are append-only; only friend sets change after
//! creation.
//!
//! Cross references (friend slots) are `UserId` indices into the store.
//! Post authors are name snapshots.

use chrono::{DateTime, Local};
use std::collections::{HashMap, VecDeque};
use thiserror::Error;
use tracing::{debug, trace};

/// Stable index of a user in the store.
pub type UserId = usize;

/// Rule separating the sections of a rendered profile.
const RULE: &str = "------------------------------------------\n";

/// Divider between two rendered posts.
const POST_SEPARATOR: &str = "\n===\n\n";

/// asctime-style timestamp layout.
const DATE_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// Size limits enforced by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Names must be strictly shorter than this many bytes.
    pub max_name: usize,
    /// Maximum number of friends per user.
    pub max_friends: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_name: 32,
            max_friends: 10,
        }
    }
}

/// Errors returned by store mutations.
///
/// The `Display` text is what a client sees when its command fails.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("a user named {0} already exists")]
    AlreadyExists(String),

    #[error("name must be shorter than {max} characters")]
    NameTooLong { max: usize },

    #[error("at least one user you entered does not exist")]
    NotFound,

    #[error("you must enter two different users")]
    SameUser,

    #[error("users are already friends")]
    AlreadyFriends,

    #[error("at least one user you entered has the max number of friends")]
    CapacityExceeded,

    #[error("at least one user you entered does not exist")]
    NullUser,

    #[error("the users are not friends")]
    NotFriends,
}

/// Capacity-bounded set of friends, kept in slot-fill order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendSet {
    slots: Vec<UserId>,
    capacity: usize,
}

impl FriendSet {
    fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn contains(&self, id: UserId) -> bool {
        self.slots.contains(&id)
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = UserId> + '_ {
        self.slots.iter().copied()
    }

    /// Fill the first free slot. Callers check capacity and membership first.
    fn insert(&mut self, id: UserId) {
        debug_assert!(!self.is_full(), "friend set over capacity");
        debug_assert!(!self.contains(id), "duplicate friend");
        self.slots.push(id);
    }
}

/// A message posted to a user's profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    /// Author's name at the time of posting
    pub author: String,
    /// When the post was made
    pub date: DateTime<Local>,
    /// Message body
    pub contents: String,
}

impl Post {
    /// Render as `From:`/`Date:` header lines, a blank line, then the body.
    pub fn render(&self) -> String {
        format!(
            "From: {}\nDate: {}\n\n{}\n",
            self.author,
            self.date.format(DATE_FORMAT),
            self.contents
        )
    }
}

/// A registered user.
#[derive(Debug, Clone)]
pub struct User {
    name: String,
    friends: FriendSet,
    /// Newest first
    posts: VecDeque<Post>,
}

impl User {
    fn new(name: &str, max_friends: usize) -> Self {
        Self {
            name: name.to_string(),
            friends: FriendSet::new(max_friends),
            posts: VecDeque::new(),
        }
    }
}

#[cfg(test)]
impl User {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn friends(&self) -> &FriendSet {
        &self.friends
    }

    pub fn posts(&self) -> impl Iterator<Item = &Post> {
        self.posts.iter()
    }

    pub fn post_count(&self) -> usize {
        self.posts.len()
    }
}

/// The social graph.
#[derive(Debug)]
pub struct Store {
    /// Users in creation order; a user's position is its `UserId`.
    users: Vec<User>,
    index: HashMap<String, UserId>,
    limits: Limits,
}

impl Store {
    pub fn new(limits: Limits) -> Self {
        debug!(
            max_name = limits.max_name,
            max_friends = limits.max_friends,
            "Initializing store"
        );
        Self {
            users: Vec::new(),
            index: HashMap::new(),
            limits,
        }
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Register a new user at the end of the user list.
    pub fn create_user(&mut self, name: &str) -> Result<UserId, StoreError> {
        if self.index.contains_key(name) {
            return Err(StoreError::AlreadyExists(name.to_string()));
        }
        if name.len() >= self.limits.max_name {
            return Err(StoreError::NameTooLong {
                max: self.limits.max_name,
            });
        }

        let id = self.users.len();
        self.users.push(User::new(name, self.limits.max_friends));
        self.index.insert(name.to_string(), id);
        trace!(name, id, "Created user");
        Ok(id)
    }

    /// Exact, case-sensitive lookup.
    pub fn find_user(&self, name: &str) -> Option<&User> {
        self.lookup(name).map(|id| &self.users[id])
    }

    pub fn lookup(&self, name: &str) -> Option<UserId> {
        self.index.get(name).copied()
    }

    /// Make two users friends with each other.
    ///
    /// Checks run in a fixed order and the first failure wins: both users
    /// must exist, be distinct, not already be friends, and each have a free
    /// slot. Neither user is modified on failure.
    pub fn make_friends(&mut self, name1: &str, name2: &str) -> Result<(), StoreError> {
        let (a, b) = match (self.lookup(name1), self.lookup(name2)) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(StoreError::NotFound),
        };
        if a == b {
            return Err(StoreError::SameUser);
        }
        if self.users[a].friends.contains(b) {
            return Err(StoreError::AlreadyFriends);
        }
        if self.users[a].friends.is_full() || self.users[b].friends.is_full() {
            return Err(StoreError::CapacityExceeded);
        }

        self.users[a].friends.insert(b);
        self.users[b].friends.insert(a);
        trace!(user1 = name1, user2 = name2, "Users are now friends");
        Ok(())
    }

    /// Post `contents` from `author` onto `target`'s profile.
    ///
    /// Only the target's friend set is consulted for the friendship check.
    pub fn make_post(
        &mut self,
        author: &str,
        target: &str,
        contents: String,
    ) -> Result<(), StoreError> {
        self.make_post_at(author, target, contents, Local::now())
    }

    pub(crate) fn make_post_at(
        &mut self,
        author: &str,
        target: &str,
        contents: String,
        date: DateTime<Local>,
    ) -> Result<(), StoreError> {
        let (author_id, target_id) = match (self.lookup(author), self.lookup(target)) {
            (Some(a), Some(t)) => (a, t),
            _ => return Err(StoreError::NullUser),
        };
        if !self.users[target_id].friends.contains(author_id) {
            return Err(StoreError::NotFriends);
        }

        let post = Post {
            author: self.users[author_id].name.clone(),
            date,
            contents,
        };
        self.users[target_id].posts.push_front(post);
        trace!(author, target, "Stored post");
        Ok(())
    }

    /// `User List` header followed by one tab-indented name per line.
    pub fn list_users(&self) -> String {
        let mut out = String::from("User List\n");
        for user in &self.users {
            out.push('\t');
            out.push_str(&user.name);
            out.push('\n');
        }
        out
    }

    /// Render the named user's profile, or `None` if no such user exists.
    pub fn profile(&self, name: &str) -> Option<String> {
        self.find_user(name).map(|user| self.render_profile(user))
    }

    fn render_profile(&self, user: &User) -> String {
        let mut out = format!("Name: {}\n\n", user.name);
        out.push_str(RULE);

        out.push_str("Friends:\n");
        for id in user.friends.iter() {
            out.push_str(&self.users[id].name);
            out.push('\n');
        }
        out.push_str(RULE);

        out.push_str("Posts:\n");
        let mut posts = user.posts.iter().peekable();
        while let Some(post) = posts.next() {
            out.push_str(&post.render());
            if posts.peek().is_some() {
                out.push_str(POST_SEPARATOR);
            }
        }
        out.push_str(RULE);
        out
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(Limits::default())
    }
}

#[cfg(test)]
impl Store {
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn user(&self, id: UserId) -> Option<&User> {
        self.users.get(id)
    }

    /// Iterate users in creation order.
    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store_with(names: &[&str], max_friends: usize) -> Store {
        let mut store = Store::new(Limits {
            max_name: 32,
            max_friends,
        });
        for name in names {
            store.create_user(name).unwrap();
        }
        store
    }

    fn friends_of(store: &Store, name: &str) -> Vec<String> {
        let user = store.find_user(name).unwrap();
        user.friends()
            .iter()
            .map(|id| store.user(id).unwrap().name().to_string())
            .collect()
    }

    fn snapshot(store: &Store) -> Vec<(Vec<String>, Vec<Post>)> {
        store
            .users()
            .map(|u| (friends_of(store, u.name()), u.posts().cloned().collect()))
            .collect()
    }

    fn fixed_date() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 2).unwrap()
    }

    #[test]
    fn test_create_and_find() {
        let mut store = Store::default();
        assert_eq!(store.create_user("alice"), Ok(0));
        assert_eq!(store.create_user("bob"), Ok(1));

        assert_eq!(store.find_user("alice").unwrap().name(), "alice");
        assert!(store.find_user("Alice").is_none());
        assert!(store.find_user("carol").is_none());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_create_duplicate() {
        let mut store = store_with(&["alice"], 10);
        assert_eq!(
            store.create_user("alice"),
            Err(StoreError::AlreadyExists("alice".to_string()))
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_create_name_too_long() {
        let mut store = Store::default();
        let name = "x".repeat(32);
        assert_eq!(
            store.create_user(&name),
            Err(StoreError::NameTooLong { max: 32 })
        );
        assert!(store.is_empty());

        assert!(store.create_user(&"x".repeat(31)).is_ok());
    }

    #[test]
    fn test_make_friends_symmetric() {
        let mut store = store_with(&["alice", "bob", "carol"], 10);

        store.make_friends("alice", "bob").unwrap();
        store.make_friends("carol", "alice").unwrap();

        assert_eq!(friends_of(&store, "alice"), vec!["bob", "carol"]);
        assert_eq!(friends_of(&store, "bob"), vec!["alice"]);
        assert_eq!(friends_of(&store, "carol"), vec!["alice"]);
    }

    #[test]
    fn test_make_friends_errors() {
        let mut store = store_with(&["alice", "bob"], 10);

        assert_eq!(store.make_friends("alice", "nobody"), Err(StoreError::NotFound));
        assert_eq!(store.make_friends("nobody", "alice"), Err(StoreError::NotFound));
        assert_eq!(store.make_friends("alice", "alice"), Err(StoreError::SameUser));

        store.make_friends("alice", "bob").unwrap();
        assert_eq!(store.make_friends("alice", "bob"), Err(StoreError::AlreadyFriends));
        assert_eq!(store.make_friends("bob", "alice"), Err(StoreError::AlreadyFriends));
    }

    #[test]
    fn test_make_friends_precedence() {
        let mut store = store_with(&["alice", "bob", "carol"], 1);
        store.make_friends("alice", "bob").unwrap();

        // Missing user outranks everything else
        assert_eq!(store.make_friends("alice", "ghost"), Err(StoreError::NotFound));
        // Same user outranks capacity
        assert_eq!(store.make_friends("alice", "alice"), Err(StoreError::SameUser));
        // Already friends is reported even though both sets are full
        assert_eq!(store.make_friends("alice", "bob"), Err(StoreError::AlreadyFriends));
        // Full on either side
        assert_eq!(store.make_friends("alice", "carol"), Err(StoreError::CapacityExceeded));
        assert_eq!(store.make_friends("carol", "alice"), Err(StoreError::CapacityExceeded));
    }

    #[test]
    fn test_capacity_bound() {
        let names = ["hub", "a", "b", "c", "d"];
        let mut store = store_with(&names, 3);

        for friend in &names[1..4] {
            store.make_friends("hub", friend).unwrap();
        }
        assert!(store.find_user("hub").unwrap().friends().is_full());

        let before = snapshot(&store);
        assert_eq!(store.make_friends("hub", "d"), Err(StoreError::CapacityExceeded));
        assert_eq!(store.make_friends("d", "hub"), Err(StoreError::CapacityExceeded));
        assert_eq!(snapshot(&store), before);
        assert!(store.find_user("d").unwrap().friends().is_empty());
    }

    #[test]
    fn test_failed_make_friends_is_atomic() {
        let mut store = store_with(&["alice", "bob"], 10);
        store.make_friends("alice", "bob").unwrap();
        let before = snapshot(&store);

        let _ = store.make_friends("alice", "bob");
        let _ = store.make_friends("alice", "alice");
        let _ = store.make_friends("alice", "ghost");

        assert_eq!(snapshot(&store), before);
    }

    #[test]
    fn test_make_post() {
        let mut store = store_with(&["alice", "bob"], 10);
        store.make_friends("alice", "bob").unwrap();

        store
            .make_post_at("alice", "bob", "first".to_string(), fixed_date())
            .unwrap();
        store
            .make_post_at("alice", "bob", "second".to_string(), fixed_date())
            .unwrap();

        let bob = store.find_user("bob").unwrap();
        let contents: Vec<_> = bob.posts().map(|p| p.contents.as_str()).collect();
        assert_eq!(contents, vec!["second", "first"]);
        assert!(bob.posts().all(|p| p.author == "alice"));
        assert_eq!(store.find_user("alice").unwrap().post_count(), 0);
    }

    #[test]
    fn test_make_post_to_self_requires_friendship() {
        let mut store = store_with(&["alice"], 10);
        assert_eq!(
            store.make_post("alice", "alice", "hi".to_string()),
            Err(StoreError::NotFriends)
        );
    }

    #[test]
    fn test_make_post_errors() {
        let mut store = store_with(&["alice", "bob"], 10);

        assert_eq!(
            store.make_post("alice", "ghost", "hi".to_string()),
            Err(StoreError::NullUser)
        );
        assert_eq!(
            store.make_post("ghost", "bob", "hi".to_string()),
            Err(StoreError::NullUser)
        );

        let before = snapshot(&store);
        assert_eq!(
            store.make_post("alice", "bob", "hi".to_string()),
            Err(StoreError::NotFriends)
        );
        assert_eq!(store.find_user("bob").unwrap().post_count(), 0);
        assert_eq!(snapshot(&store), before);
    }

    #[test]
    fn test_list_users() {
        let store = store_with(&["alice", "bob"], 10);
        assert_eq!(store.list_users(), "User List\n\talice\n\tbob\n");
        assert_eq!(Store::default().list_users(), "User List\n");
    }

    #[test]
    fn test_post_render() {
        let post = Post {
            author: "alice".to_string(),
            date: fixed_date(),
            contents: "hello world".to_string(),
        };
        assert_eq!(
            post.render(),
            "From: alice\nDate: Thu Mar  7 09:05:02 2024\n\nhello world\n"
        );
    }

    #[test]
    fn test_profile_layout() {
        let mut store = store_with(&["alice", "bob", "carol"], 10);
        store.make_friends("bob", "alice").unwrap();
        store.make_friends("bob", "carol").unwrap();
        store
            .make_post_at("alice", "bob", "one".to_string(), fixed_date())
            .unwrap();
        store
            .make_post_at("carol", "bob", "two".to_string(), fixed_date())
            .unwrap();

        let expected = format!(
            "Name: bob\n\n{rule}Friends:\nalice\ncarol\n{rule}Posts:\n\
             From: carol\nDate: Thu Mar  7 09:05:02 2024\n\ntwo\n\
             \n===\n\n\
             From: alice\nDate: Thu Mar  7 09:05:02 2024\n\none\n\
             {rule}",
            rule = RULE
        );
        assert_eq!(store.profile("bob").unwrap(), expected);
    }

    #[test]
    fn test_profile_empty_user() {
        let store = store_with(&["alice"], 10);
        let expected = format!("Name: alice\n\n{RULE}Friends:\n{RULE}Posts:\n{RULE}");
        assert_eq!(store.profile("alice").unwrap(), expected);
        assert!(store.profile("ghost").is_none());
    }

    #[test]
    fn test_profile_deterministic() {
        let mut store = store_with(&["alice", "bob"], 10);
        store.make_friends("alice", "bob").unwrap();
        store.make_post("bob", "alice", "hey".to_string()).unwrap();

        assert_eq!(store.profile("alice"), store.profile("alice"));
    }
}
