use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Member => "member",
        }
    }
}

impl Store {
    /// Role synced from the admin tools. Unknown users are plain members.
    pub fn user_role(&self, user_id: &str) -> rusqlite::Result<Role> {
        let role: Option<String> = self
            .conn_ref()
            .query_row(
                "SELECT role FROM users WHERE id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;

        Ok(match role.as_deref() {
            Some("admin") => Role::Admin,
            _ => Role::Member,
        })
    }

    pub fn set_user_role(&self, user_id: &str, role: Role) -> rusqlite::Result<()> {
        self.conn_ref().execute(
            "INSERT INTO users (id, role) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET role = excluded.role",
            params![user_id, role.as_str()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_users_are_members() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.user_role("nobody").unwrap(), Role::Member);

        store.set_user_role("owner-1", Role::Admin).unwrap();
        assert_eq!(store.user_role("owner-1").unwrap(), Role::Admin);

        store.set_user_role("owner-1", Role::Member).unwrap();
        assert_eq!(store.user_role("owner-1").unwrap(), Role::Member);
    }
}
