//! In-memory store

use super::Store;
use crate::error::{BridgeError, BridgeResult};
use crate::models::{Connection, OwnerInfo, Project, ProjectWithOwner, Role, User, UserSummary};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    projects: HashMap<Uuid, Project>,
    connections: HashMap<Uuid, Connection>,
}

impl State {
    fn remove_project(&mut self, id: Uuid) -> bool {
        self.connections.retain(|_, c| c.project_id != id);
        self.projects.remove(&id).is_some()
    }
}

/// Process-local store guarded by a single lock
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn health_check(&self) -> BridgeResult<()> {
        Ok(())
    }

    async fn find_user(&self, id: Uuid) -> BridgeResult<Option<User>> {
        Ok(self.state.read().users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> BridgeResult<Option<User>> {
        Ok(self
            .state
            .read()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn list_users(&self) -> BridgeResult<Vec<UserSummary>> {
        let state = self.state.read();
        let mut users: Vec<UserSummary> = state
            .users
            .values()
            .map(|user| UserSummary {
                project_count: state
                    .projects
                    .values()
                    .filter(|p| p.user_id == user.id)
                    .count() as i64,
                user: user.clone(),
            })
            .collect();
        users.sort_by(|a, b| b.user.created_at.cmp(&a.user.created_at));
        Ok(users)
    }

    async fn count_admins(&self) -> BridgeResult<i64> {
        Ok(self
            .state
            .read()
            .users
            .values()
            .filter(|u| u.role == Role::Admin)
            .count() as i64)
    }

    async fn create_user(&self, user: User) -> BridgeResult<User> {
        let mut state = self.state.write();
        if state.users.values().any(|u| u.email == user.email) {
            return Err(BridgeError::validation("A user with this email already exists"));
        }
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_user(&self, user: User) -> BridgeResult<User> {
        let mut state = self.state.write();
        if state
            .users
            .values()
            .any(|u| u.email == user.email && u.id != user.id)
        {
            return Err(BridgeError::validation("A user with this email already exists"));
        }
        match state.users.get_mut(&user.id) {
            Some(existing) => {
                *existing = user.clone();
                Ok(user)
            }
            None => Err(BridgeError::not_found("User")),
        }
    }

    async fn delete_user(&self, id: Uuid) -> BridgeResult<bool> {
        let mut state = self.state.write();
        let owned: Vec<Uuid> = state
            .projects
            .values()
            .filter(|p| p.user_id == id)
            .map(|p| p.id)
            .collect();
        for project_id in owned {
            state.remove_project(project_id);
        }
        Ok(state.users.remove(&id).is_some())
    }

    async fn find_project(&self, id: Uuid) -> BridgeResult<Option<Project>> {
        Ok(self.state.read().projects.get(&id).cloned())
    }

    async fn list_projects_by_owner(&self, user_id: Uuid) -> BridgeResult<Vec<Project>> {
        let mut projects: Vec<Project> = self
            .state
            .read()
            .projects
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(projects)
    }

    async fn list_all_projects(&self) -> BridgeResult<Vec<ProjectWithOwner>> {
        let state = self.state.read();
        let mut projects: Vec<ProjectWithOwner> = state
            .projects
            .values()
            .filter_map(|project| {
                state.users.get(&project.user_id).map(|owner| ProjectWithOwner {
                    project: project.clone(),
                    user: OwnerInfo {
                        id: owner.id,
                        email: owner.email.clone(),
                        name: owner.name.clone(),
                    },
                })
            })
            .collect();
        projects.sort_by(|a, b| b.project.created_at.cmp(&a.project.created_at));
        Ok(projects)
    }

    async fn create_project(&self, project: Project) -> BridgeResult<Project> {
        self.state
            .write()
            .projects
            .insert(project.id, project.clone());
        Ok(project)
    }

    async fn update_project(&self, project: Project) -> BridgeResult<Project> {
        match self.state.write().projects.get_mut(&project.id) {
            Some(existing) => {
                *existing = project.clone();
                Ok(project)
            }
            None => Err(BridgeError::not_found("Project")),
        }
    }

    async fn delete_project(&self, id: Uuid) -> BridgeResult<bool> {
        Ok(self.state.write().remove_project(id))
    }

    async fn find_connection(&self, project_id: Uuid, id: Uuid) -> BridgeResult<Option<Connection>> {
        Ok(self
            .state
            .read()
            .connections
            .get(&id)
            .filter(|c| c.project_id == project_id)
            .cloned())
    }

    async fn find_connection_by_webhook(&self, webhook_path: &str) -> BridgeResult<Option<Connection>> {
        Ok(self
            .state
            .read()
            .connections
            .values()
            .find(|c| c.webhook_url == webhook_path)
            .cloned())
    }

    async fn list_connections(&self, project_id: Uuid) -> BridgeResult<Vec<Connection>> {
        let mut connections: Vec<Connection> = self
            .state
            .read()
            .connections
            .values()
            .filter(|c| c.project_id == project_id)
            .cloned()
            .collect();
        connections.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(connections)
    }

    async fn create_connection(&self, connection: Connection) -> BridgeResult<Connection> {
        let mut state = self.state.write();
        if state
            .connections
            .values()
            .any(|c| c.webhook_url == connection.webhook_url)
        {
            return Err(BridgeError::internal("Webhook path collision"));
        }
        state.connections.insert(connection.id, connection.clone());
        Ok(connection)
    }

    async fn update_connection(&self, mut connection: Connection) -> BridgeResult<Connection> {
        let mut state = self.state.write();
        let existing = state
            .connections
            .get_mut(&connection.id)
            .filter(|c| c.project_id == connection.project_id)
            .ok_or_else(|| BridgeError::not_found("Connection"))?;

        connection.webhook_url = existing.webhook_url.clone();
        connection.created_at = existing.created_at;
        *existing = connection.clone();
        Ok(connection)
    }

    async fn delete_connection(&self, project_id: Uuid, id: Uuid) -> BridgeResult<bool> {
        let mut state = self.state.write();
        let owned = state
            .connections
            .get(&id)
            .map(|c| c.project_id == project_id)
            .unwrap_or(false);
        if owned {
            state.connections.remove(&id);
        }
        Ok(owned)
    }
}
