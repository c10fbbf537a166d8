//! User and group records.

use apollo_protocol::{GroupId, LocationId, RealmId, UserId};
use serde::{Deserialize, Serialize};

use crate::{Record, credentials};

/// A user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    /// `sha256("<lowercased name>:<password>")`, hex.
    pub pwhash: String,
    pub online: bool,
    pub location_id: LocationId,
    pub group_id: Option<GroupId>,
    pub realm_id: Option<RealmId>,
}

impl User {
    /// Creates an offline user, hashing `password`.
    pub fn new(id: UserId, name: impl Into<String>, password: &str, location_id: LocationId) -> Self {
        let name = name.into();
        let pwhash = credentials::hash_password(&name, password);
        Self {
            id,
            name,
            pwhash,
            online: false,
            location_id,
            group_id: None,
            realm_id: None,
        }
    }

    pub fn in_group(mut self, group_id: GroupId) -> Self {
        self.group_id = Some(group_id);
        self
    }

    pub fn in_realm(mut self, realm_id: RealmId) -> Self {
        self.realm_id = Some(realm_id);
        self
    }
}

/// Query over users. Unset criteria match everything.
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    /// Case-insensitive name match.
    pub name: Option<String>,
    pub online: Option<bool>,
    pub location_id: Option<LocationId>,
    pub group_id: Option<GroupId>,
    pub realm_id: Option<RealmId>,
}

impl UserFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn online() -> Self {
        Self {
            online: Some(true),
            ..Self::default()
        }
    }

    pub fn at_location(mut self, location_id: LocationId) -> Self {
        self.location_id = Some(location_id);
        self
    }

    pub fn in_group(mut self, group_id: GroupId) -> Self {
        self.group_id = Some(group_id);
        self
    }

    pub fn in_realm(mut self, realm_id: RealmId) -> Self {
        self.realm_id = Some(realm_id);
        self
    }
}

impl Record for User {
    type Id = UserId;
    type Filter = UserFilter;
    const KIND: &'static str = "user";

    fn id(&self) -> UserId {
        self.id
    }

    fn matches(&self, f: &UserFilter) -> bool {
        f.name.as_ref().is_none_or(|n| n.eq_ignore_ascii_case(&self.name))
            && f.online.is_none_or(|o| o == self.online)
            && f.location_id.is_none_or(|l| l == self.location_id)
            && f.group_id.is_none_or(|g| Some(g) == self.group_id)
            && f.realm_id.is_none_or(|r| Some(r) == self.realm_id)
    }
}

/// A permission group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    /// Granted permissions. `*` grants everything; `a.*` grants every
    /// permission under `a.`.
    pub permissions: Vec<String>,
}

impl Group {
    pub fn new(id: GroupId, name: impl Into<String>, permissions: &[&str]) -> Self {
        Self {
            id,
            name: name.into(),
            permissions: permissions.iter().map(|p| (*p).to_owned()).collect(),
        }
    }

    pub fn grants(&self, permission: &str) -> bool {
        self.permissions.iter().any(|granted| {
            granted == "*"
                || granted == permission
                || granted
                    .strip_suffix('*')
                    .is_some_and(|prefix| prefix.ends_with('.') && permission.starts_with(prefix))
        })
    }
}

impl Record for Group {
    type Id = GroupId;
    type Filter = ();
    const KIND: &'static str = "group";

    fn id(&self) -> GroupId {
        self.id
    }

    fn matches(&self, _: &()) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_filter_name_is_case_insensitive() {
        let user = User::new(UserId(1), "Alice", "pw", LocationId(1));
        assert!(user.matches(&UserFilter::named("alice")));
        assert!(!user.matches(&UserFilter::named("bob")));
    }

    #[test]
    fn test_user_filter_combines_criteria() {
        let mut user = User::new(UserId(1), "alice", "pw", LocationId(3)).in_group(GroupId(2));
        assert!(!user.matches(&UserFilter::online()));
        user.online = true;
        assert!(user.matches(&UserFilter::online().at_location(LocationId(3))));
        assert!(!user.matches(&UserFilter::online().at_location(LocationId(4))));
        assert!(user.matches(&UserFilter::all().in_group(GroupId(2))));
        assert!(!user.matches(&UserFilter::all().in_realm(RealmId(1))));
    }

    #[test]
    fn test_group_grants_exact_and_wildcards() {
        let mods = Group::new(GroupId(1), "mods", &["moderator.*", "chat"]);
        assert!(mods.grants("moderator.kick"));
        assert!(mods.grants("chat"));
        assert!(!mods.grants("admin.shutdown"));
        assert!(!mods.grants("moderatorx"));

        let admins = Group::new(GroupId(2), "admins", &["*"]);
        assert!(admins.grants("anything.at.all"));

        let nobody = Group::new(GroupId(3), "players", &[]);
        assert!(!nobody.grants("moderator.kick"));
    }
}
