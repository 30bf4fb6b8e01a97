//! Member registration and profile maintenance. Removing a member goes
//! through [`crate::DeletionService`].

use std::sync::Arc;

use chrono::Utc;
use domains::{
    BoardStore, BoardTx, DomainResult, Member, MemberFilter, MemberId, NewMember, Role,
    ValidationErrors, ValidationKind,
};
use tracing::{info, instrument};

use crate::required;

/// Sign-up form. The password arrives already hashed by the auth layer.
#[derive(Debug, Clone, Default)]
pub struct MemberForm {
    pub login_id: String,
    pub password: String,
    pub username: String,
    pub nickname: String,
}

#[derive(Debug, Clone, Default)]
pub struct MemberUpdate {
    pub username: String,
    pub nickname: String,
}

#[derive(Clone)]
pub struct MemberService {
    store: Arc<dyn BoardStore>,
}

impl MemberService {
    pub fn new(store: Arc<dyn BoardStore>) -> Self {
        Self { store }
    }

    /// Creates a USER account. Blank fields and taken login id or nickname
    /// are all reported at once.
    #[instrument(skip(self, form), fields(login_id = %form.login_id))]
    pub async fn register(&self, form: MemberForm) -> DomainResult<Member> {
        let mut errors = ValidationErrors::new();
        errors.require_text("login_id", &form.login_id);
        errors.require_text("password", &form.password);
        errors.require_text("username", &form.username);
        errors.require_text("nickname", &form.nickname);

        let mut tx = self.store.begin().await?;
        if tx.find_member_by_login_id(&form.login_id).await?.is_some() {
            errors.reject_field("login_id", ValidationKind::DuplicateLoginId);
        }
        if tx.find_member_by_nickname(&form.nickname).await?.is_some() {
            errors.reject_field("nickname", ValidationKind::DuplicateNickname);
        }
        errors.into_result()?;

        let row = NewMember {
            login_id: form.login_id,
            password: form.password,
            username: form.username,
            nickname: form.nickname,
            role: Role::User,
            created_at: Utc::now(),
        };
        let id = tx.insert_member(&row).await?;
        tx.commit().await?;

        info!(member_id = %id, "member registered");
        Ok(Member {
            id,
            login_id: row.login_id,
            password: row.password,
            username: row.username,
            nickname: row.nickname,
            role: row.role,
            created_at: row.created_at,
            updated_at: None,
        })
    }

    pub async fn get_member(&self, member_id: MemberId) -> DomainResult<Member> {
        let mut tx = self.store.begin().await?;
        let member = required(tx.find_member(member_id).await?, "member", member_id)?;
        tx.commit().await?;
        Ok(member)
    }

    /// Changes username and nickname. Keeping one's own nickname is not a
    /// conflict.
    #[instrument(skip(self, update))]
    pub async fn update_profile(&self, member_id: MemberId, update: MemberUpdate) -> DomainResult<Member> {
        let mut errors = ValidationErrors::new();
        errors.require_text("username", &update.username);
        errors.require_text("nickname", &update.nickname);

        let mut tx = self.store.begin().await?;
        let mut member = required(tx.find_member(member_id).await?, "member", member_id)?;
        if taken_by_other(&mut *tx, &update.nickname, member_id).await? {
            errors.reject_field("nickname", ValidationKind::DuplicateNickname);
        }
        errors.into_result()?;

        member.username = update.username;
        member.nickname = update.nickname;
        member.updated_at = Some(Utc::now());
        tx.update_member(&member).await?;
        tx.commit().await?;

        info!(%member_id, "profile updated");
        Ok(member)
    }

    #[instrument(skip(self))]
    pub async fn change_role(&self, member_id: MemberId, role: Role) -> DomainResult<Member> {
        let mut tx = self.store.begin().await?;
        let mut member = required(tx.find_member(member_id).await?, "member", member_id)?;
        member.role = role;
        member.updated_at = Some(Utc::now());
        tx.update_member(&member).await?;
        tx.commit().await?;

        info!(%member_id, %role, "role changed");
        Ok(member)
    }

    /// Page of the member listing to return to after a member was deleted
    /// while `page` was shown.
    pub async fn page_after_removal(&self, page: u64, page_size: u64) -> DomainResult<u64> {
        let mut tx = self.store.begin().await?;
        let remaining = tx.count_members(&MemberFilter::default()).await?;
        tx.commit().await?;
        Ok(domains::page_after_removal(remaining + 1, page, page_size))
    }
}

async fn taken_by_other(tx: &mut dyn BoardTx, nickname: &str, me: MemberId) -> DomainResult<bool> {
    Ok(tx
        .find_member_by_nickname(nickname)
        .await?
        .is_some_and(|m| m.id != me))
}
