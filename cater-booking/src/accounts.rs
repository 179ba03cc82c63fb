use futures_util::future::join_all;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use cater_core::identity::Actor;
use cater_core::outbox::MirrorTask;
use cater_core::repository::UserRepository;
use cater_core::search::USERS;
use cater_core::user::{NewUser, User, UserChanges};
use cater_core::{CoreError, CoreResult, Entity};
use cater_shared::{Masked, Page, Paging};

use crate::mirror::MirrorSync;
use crate::models::Acknowledgement;
use crate::notifications::NotificationDispatcher;
use crate::orchestrator::PaymentOrchestrator;

pub const USER_REMOVED: &str = "User has been successfully removed.";

/// User profiles and their search mirror.
pub struct UserService {
    users: Arc<dyn UserRepository>,
    mirror: Arc<MirrorSync>,
    notifier: Arc<NotificationDispatcher>,
    payments: Arc<PaymentOrchestrator>,
}

impl UserService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        mirror: Arc<MirrorSync>,
        notifier: Arc<NotificationDispatcher>,
        payments: Arc<PaymentOrchestrator>,
    ) -> Self {
        Self {
            users,
            mirror,
            notifier,
            payments,
        }
    }

    /// Create the profile, link a provider customer, send the welcome mail
    /// and mirror the profile. Only the insert can fail the call.
    pub async fn register(&self, new_user: &NewUser) -> CoreResult<User> {
        new_user.validate()?;
        let mut user = self.users.create_user(new_user).await?;
        info!(user_id = %user.id, email = %Masked(&user.email), "User registered");

        match self.payments.create_customer(&user.email).await {
            Ok(customer) => match self.users.set_provider_customer(user.id, &customer.id).await {
                Ok(linked) => user = linked,
                Err(err) => error!(
                    consistency_gap = true,
                    user_id = %user.id,
                    provider_customer = %customer.id,
                    "Provider customer created but not linked: {}",
                    err
                ),
            },
            Err(err) => error!(
                consistency_gap = true,
                user_id = %user.id,
                "Provider customer not created: {}",
                err
            ),
        }

        if let Err(err) = self.notifier.welcome(&user).await {
            warn!(user_id = %user.id, "Welcome mail not delivered: {}", err);
        }

        self.mirror
            .dispatch(MirrorTask::IndexUser { user_id: user.id })
            .await;
        Ok(user)
    }

    pub async fn get_user(&self, id: Uuid) -> CoreResult<User> {
        self.users
            .get_user(id)
            .await?
            .ok_or_else(|| CoreError::not_found(Entity::User, id))
    }

    fn ensure_manage(actor: &Actor, user_id: Uuid) -> CoreResult<()> {
        if actor.can_manage_user(user_id) {
            Ok(())
        } else {
            Err(CoreError::NotPermitted(format!(
                "cannot modify user {user_id}"
            )))
        }
    }

    pub async fn update_user(
        &self,
        id: Uuid,
        changes: &UserChanges,
        actor: &Actor,
    ) -> CoreResult<User> {
        Self::ensure_manage(actor, id)?;
        changes.validate()?;
        if changes.is_empty() {
            return self.get_user(id).await;
        }

        let user = self.users.update_user(id, changes).await?;
        info!(user_id = %id, "User updated");

        let fields = changes
            .mirror_patch()
            .as_object()
            .map(|patch| patch.keys().cloned().collect())
            .unwrap_or_default();
        self.mirror
            .dispatch(MirrorTask::UpdateUserDoc { user_id: id, fields })
            .await;
        Ok(user)
    }

    pub async fn remove_user(&self, id: Uuid, actor: &Actor) -> CoreResult<Acknowledgement> {
        Self::ensure_manage(actor, id)?;
        self.users.delete_user(id).await?;
        info!(user_id = %id, "User removed");
        self.mirror
            .dispatch(MirrorTask::RemoveUserDoc { user_id: id })
            .await;
        Ok(Acknowledgement::new(USER_REMOVED))
    }

    /// Query the user mirror and load each hit from the relational store.
    pub async fn search_users(&self, query: &str, paging: Paging) -> CoreResult<Page<User>> {
        let (hits, total) = self
            .mirror
            .index()
            .query(USERS, query, paging.limit, paging.offset)
            .await?;

        let ids: Vec<Uuid> = hits.iter().filter_map(|hit| hit.entity_id()).collect();
        let loads = ids.iter().map(|id| self.get_user(*id));
        let results = join_all(loads)
            .await
            .into_iter()
            .zip(&ids)
            .filter_map(|(result, id)| match result {
                Ok(user) => Some(user),
                Err(err) => {
                    warn!(user_id = %id, "Dropping user from results: {}", err);
                    None
                }
            })
            .collect();
        Ok(Page::new(total, paging, results))
    }
}
