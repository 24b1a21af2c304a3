use libloan::{
    config::{LibraryConfig, LoanPolicy},
    core::store::LibraryStore,
    engine::traits::{CatalogStore, FinePolicyStore},
    error::LibraryError,
    services::{
        catalog::{
            BookFilter, BookSubmission, BookUpdate, PageRequest, SortBy, get_book, list_books,
            soft_delete_book, submit_book, update_book,
        },
        membership::{BorrowerRegistration, find_borrower, register_borrower},
    },
    types::MembershipTier,
};

fn submission(title: &str, category: &str, isbn: Option<&str>, copies: u32) -> BookSubmission {
    BookSubmission {
        title: title.to_string(),
        author: Some(format!("{title} author")),
        category: Some(category.to_string()),
        isbn: isbn.map(str::to_string),
        total_copies: copies,
    }
}

fn registration(name: &str, email: &str, tier: Option<MembershipTier>) -> BorrowerRegistration {
    BorrowerRegistration {
        name: name.to_string(),
        email: email.to_string(),
        tier,
    }
}

#[test]
fn new_title_is_catalogued_with_all_copies_available() {
    let mut store = LibraryStore::new();
    let dune = submission("Dune", "Fiction", Some("978-0"), 3);
    let book = submit_book(&mut store, dune).expect("submit");

    assert_eq!(book.id, 1);
    assert_eq!(book.total_copies, 3);
    assert_eq!(book.available_copies, 3);
    assert!(book.is_available);
    assert!(!book.deleted);
    assert_eq!(get_book(&store, book.id).expect("get"), book);
}

#[test]
fn resubmitting_a_title_adds_copies_to_it() {
    let mut store = LibraryStore::new();
    let first = submit_book(&mut store, submission("Dune", "Fiction", None, 2)).expect("first");
    let second = submit_book(&mut store, submission("Dune", "Fiction", None, 3)).expect("second");

    assert_eq!(second.id, first.id);
    assert_eq!(second.total_copies, 5);
    assert_eq!(second.available_copies, 5);
    assert_eq!(store.all_books().len(), 1);
}

#[test]
fn duplicate_isbn_is_rejected() {
    let mut store = LibraryStore::new();
    submit_book(&mut store, submission("Dune", "Fiction", Some("978-0"), 1)).expect("first");

    let emma = submission("Emma", "Fiction", Some("978-0"), 1);
    let err = submit_book(&mut store, emma).expect_err("same isbn");
    assert_eq!(
        err,
        LibraryError::Duplicate("A book with this ISBN already exists.".to_string())
    );
    assert_eq!(store.all_books().len(), 1);
}

#[test]
fn submission_validation_runs_before_the_store() {
    let mut store = LibraryStore::new();

    let untitled = submission("   ", "Fiction", None, 1);
    let blank = submit_book(&mut store, untitled).expect_err("title");
    assert_eq!(blank, LibraryError::InvalidInput("Title must be provided".to_string()));

    let no_copies = submission("Dune", "Fiction", None, 0);
    let empty = submit_book(&mut store, no_copies).expect_err("copies");
    assert_eq!(
        empty,
        LibraryError::InvalidInput("Total copies must be at least 1".to_string())
    );

    assert!(store.all_books().is_empty());
    assert_eq!(store.latest_op_seq(), 0);
}

#[test]
fn update_overwrites_fields_and_shifts_available_by_the_difference() {
    let mut store = LibraryStore::new();
    let book = submit_book(&mut store, submission("Dune", "Fiction", None, 3)).expect("submit");

    let updated = update_book(
        &mut store,
        book.id,
        BookUpdate {
            title: Some("Dune Messiah".to_string()),
            author: Some(" ".to_string()),
            total_copies: 5,
            ..BookUpdate::default()
        },
    )
    .expect("update");

    assert_eq!(updated.title, "Dune Messiah");
    assert_eq!(updated.author.as_deref(), Some("Dune author"));
    assert_eq!(updated.total_copies, 5);
    assert_eq!(updated.available_copies, 5);
    assert!(store.find_book_by_title("Dune").is_none());
    assert_eq!(store.find_book_by_title("Dune Messiah").map(|b| b.id), Some(book.id));
}

#[test]
fn update_to_an_existing_title_is_a_duplicate() {
    let mut store = LibraryStore::new();
    submit_book(&mut store, submission("Dune", "Fiction", None, 1)).expect("dune");
    let emma = submit_book(&mut store, submission("Emma", "Fiction", None, 1)).expect("emma");

    let err = update_book(
        &mut store,
        emma.id,
        BookUpdate {
            title: Some("Dune".to_string()),
            ..BookUpdate::default()
        },
    )
    .expect_err("title taken");
    assert!(matches!(err, LibraryError::Duplicate(_)));
    assert_eq!(get_book(&store, emma.id).expect("emma").title, "Emma");
}

#[test]
fn soft_delete_hides_the_book_and_frees_its_title() {
    let mut store = LibraryStore::new();
    let dune = submission("Dune", "Fiction", Some("978-0"), 1);
    let book = submit_book(&mut store, dune).expect("submit");

    soft_delete_book(&mut store, book.id).expect("delete");

    assert!(matches!(get_book(&store, book.id), Err(LibraryError::NotFound(_))));
    assert!(matches!(soft_delete_book(&mut store, book.id), Err(LibraryError::NotFound(_))));
    assert!(store.find_book_with_deleted(book.id).is_some_and(|b| b.deleted));

    let reissue = submission("Dune", "Fiction", Some("978-0"), 2);
    let again = submit_book(&mut store, reissue).expect("new copy");
    assert_ne!(again.id, book.id);
    assert_eq!(again.total_copies, 2);
}

#[test]
fn listing_filters_sorts_and_pages() {
    let mut store = LibraryStore::new();
    for (title, category) in [
        ("Emma", "Fiction"),
        ("Cosmos", "Science"),
        ("Anna", "Fiction"),
        ("Brief", "Science"),
    ] {
        submit_book(&mut store, submission(title, category, None, 1)).expect("submit");
    }

    let all = list_books(&store, &BookFilter::default(), PageRequest::default());
    let titles: Vec<_> = all.items.iter().map(|b| b.title.as_str()).collect();
    assert_eq!(titles, ["Anna", "Brief", "Cosmos", "Emma"]);
    assert_eq!(all.total, 4);

    let fiction = list_books(
        &store,
        &BookFilter {
            category: Some("Fiction".to_string()),
            available: None,
        },
        PageRequest::default(),
    );
    assert_eq!(fiction.total, 2);
    assert!(fiction.items.iter().all(|b| b.category.as_deref() == Some("Fiction")));

    let second_page = list_books(
        &store,
        &BookFilter::default(),
        PageRequest {
            page: 1,
            size: 3,
            sort_by: SortBy::Id,
        },
    );
    assert_eq!(second_page.items.len(), 1);
    assert_eq!(second_page.items[0].title, "Brief");
    assert_eq!(second_page.total, 4);

    let past_end = list_books(
        &store,
        &BookFilter::default(),
        PageRequest {
            page: 9,
            size: 0,
            sort_by: SortBy::Title,
        },
    );
    assert!(past_end.items.is_empty());
    assert_eq!(past_end.size, 10);
}

#[test]
fn tier_sets_loan_cap_at_registration() {
    let mut store = LibraryStore::new();
    let policy = LoanPolicy::default();

    let p = registration("P", "p@example.com", Some(MembershipTier::Premium));
    let premium = register_borrower(&mut store, p, &policy).expect("premium");
    let b = registration("B", "b@example.com", Some(MembershipTier::Basic));
    let basic = register_borrower(&mut store, b, &policy).expect("basic");
    let u = registration("U", "u@example.com", None);
    let unspecified = register_borrower(&mut store, u, &policy).expect("default");

    assert_eq!(premium.max_loans, 5);
    assert_eq!(basic.max_loans, 2);
    assert_eq!(unspecified.max_loans, 2);
    assert_eq!(unspecified.tier, MembershipTier::Basic);
    assert_eq!(find_borrower(&store, premium.id).expect("find"), premium);
}

#[test]
fn configured_caps_override_stock_limits() {
    let mut store = LibraryStore::new();
    let policy = LoanPolicy {
        premium_loan_limit: 8,
        ..LoanPolicy::default()
    };
    let p = registration("P", "p@example.com", Some(MembershipTier::Premium));
    let borrower = register_borrower(&mut store, p, &policy).expect("premium");
    assert_eq!(borrower.max_loans, 8);
}

#[test]
fn duplicate_email_and_blank_fields_are_rejected() {
    let mut store = LibraryStore::new();
    let policy = LoanPolicy::default();
    let ada = registration("Ada", "ada@example.com", None);
    register_borrower(&mut store, ada, &policy).expect("first");

    let other = registration("Other", "ada@example.com", None);
    let dup = register_borrower(&mut store, other, &policy).expect_err("dup");
    assert_eq!(
        dup,
        LibraryError::Duplicate("A borrower with this email already exists.".to_string())
    );

    let nameless = registration(" ", "x@example.com", None);
    let blank = register_borrower(&mut store, nameless, &policy).expect_err("blank");
    assert!(matches!(blank, LibraryError::InvalidInput(_)));

    assert!(matches!(find_borrower(&store, 99), Err(LibraryError::NotFound(_))));
}

#[test]
fn config_seeds_fine_policies_and_upserts_by_category() {
    let cfg = LibraryConfig::from_json_str(
        r#"{ "fine_policies": [
            { "category": "Fiction", "fine_per_day": 5.0 },
            { "category": "Science", "fine_per_day": 2.5 }
        ] }"#,
    )
    .expect("config");
    let mut store = LibraryStore::new();
    cfg.seed_fine_policies(&mut store).expect("seed");

    let updated = store.put_fine_policy("fiction", 7.0).expect("upsert");
    let policies = store.fine_policies();
    assert_eq!(policies.len(), 2);
    assert_eq!(updated.id, policies[0].id);
    assert_eq!(policies[0].fine_per_day, 7.0);

    assert!(store.put_fine_policy("Maps", -1.0).is_err());
    assert_eq!(store.fine_policies().len(), 2);
}

#[test]
fn fine_policy_upsert_folds_non_ascii_case() {
    let mut store = LibraryStore::new();
    let first = store.put_fine_policy("ÉTUDE", 3.0).expect("insert");
    let second = store.put_fine_policy("étude", 4.0).expect("upsert");

    assert_eq!(first.id, second.id);
    assert_eq!(store.fine_policies().len(), 1);
    assert_eq!(store.fine_policies()[0].fine_per_day, 4.0);
}
