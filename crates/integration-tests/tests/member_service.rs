use domains::{MemberFilter, MemberSearchOption, PageRequest, Role, ValidationKind};
use integration_tests::TestBoard;
use services::{MemberForm, MemberUpdate};

fn form(login: &str, nickname: &str) -> MemberForm {
    MemberForm {
        login_id: login.into(),
        password: "hashed".into(),
        username: "someone".into(),
        nickname: nickname.into(),
    }
}

#[tokio::test]
async fn duplicate_login_and_nickname_are_collected() {
    let board = TestBoard::new();
    board.members.register(form("ferris", "crab")).await.unwrap();

    let err = board.members.register(form("ferris", "crab")).await.unwrap_err();
    let errors = err.validation_errors().unwrap();
    assert!(errors.has(ValidationKind::DuplicateLoginId));
    assert!(errors.has(ValidationKind::DuplicateNickname));

    let err = board.members.register(form("other", "crab")).await.unwrap_err();
    let errors = err.validation_errors().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors.for_field("nickname").count(), 1);
}

#[tokio::test]
async fn blank_fields_are_rejected_per_field() {
    let board = TestBoard::new();
    let err = board
        .members
        .register(MemberForm {
            login_id: " ".into(),
            ..form("x", "y")
        })
        .await
        .unwrap_err();

    let errors = err.validation_errors().unwrap();
    assert_eq!(errors.for_field("login_id").count(), 1);
    assert!(errors.has(ValidationKind::Blank));
}

#[tokio::test]
async fn profile_update_checks_other_members_only() {
    let board = TestBoard::new();
    let alice = board.member("alice").await;
    board.member("bob").await;

    let updated = board
        .members
        .update_profile(
            alice.id,
            MemberUpdate {
                username: "Alice A.".into(),
                nickname: "alice".into(),
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.username, "Alice A.");
    assert!(updated.updated_at.is_some());

    let err = board
        .members
        .update_profile(
            alice.id,
            MemberUpdate {
                username: "Alice".into(),
                nickname: "bob".into(),
            },
        )
        .await
        .unwrap_err();
    assert!(err.validation_errors().is_some_and(|e| e.has(ValidationKind::DuplicateNickname)));
}

#[tokio::test]
async fn role_changes_are_persisted() {
    let board = TestBoard::new();
    let alice = board.member("alice").await;
    assert_eq!(alice.role, Role::User);

    board.members.change_role(alice.id, Role::Admin).await.unwrap();

    let reloaded = board.members.get_member(alice.id).await.unwrap();
    assert_eq!(reloaded.role, Role::Admin);
    assert!(reloaded.updated_at.is_some());
}

#[tokio::test]
async fn member_listing_steps_back_after_last_row_is_removed() {
    let board = TestBoard::new();
    let mut last = None;
    for i in 0..11 {
        last = Some(board.member(&format!("m{i}")).await);
    }
    let last = last.unwrap();

    let page_two = board
        .search
        .search_members(&MemberFilter::default(), &PageRequest::new(2, 10))
        .await
        .unwrap();
    assert_eq!(page_two.items.len(), 1);

    board.deletion.delete_member(last.id).await.unwrap();
    assert_eq!(board.members.page_after_removal(2, 10).await.unwrap(), 1);

    let by_nickname = board
        .search
        .search_members(&MemberFilter::new(MemberSearchOption::ByNickname, "m1"), &PageRequest::default())
        .await
        .unwrap();
    assert_eq!(by_nickname.total_count, 1, "m1 only; m10 was removed");
}
