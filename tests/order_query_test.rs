mod common;

use assert_matches::assert_matches;
use common::{contact, TestApp};
use rust_decimal_macros::dec;
use storefront_api::{
    auth::Actor,
    entities::order::{OrderStatus, PaymentStatus},
    errors::ServiceError,
    services::orders::{
        OrderFilter, OrderSort, PageRequest, ShippingInfoUpdate, SortDirection, SortField,
    },
};
use uuid::Uuid;

/// Places one order per quantity for `customer`, returning the order ids.
async fn place_orders(app: &TestApp, customer: &Actor, quantities: &[i32]) -> Vec<Uuid> {
    let mug = app.seed_product("Mug", dec!(10000), 1000).await;
    let mut ids = Vec::new();
    for &quantity in quantities {
        app.add_to_cart(customer, mug.id, quantity).await;
        let order = app
            .state
            .services
            .checkout
            .create_order(customer, contact())
            .await
            .expect("place order");
        ids.push(order.order.id);
    }
    ids
}

fn by_total(direction: SortDirection) -> OrderSort {
    OrderSort {
        field: SortField::Total,
        direction,
    }
}

#[tokio::test]
async fn cursor_pages_cover_every_order_once_in_sort_order() {
    let app = TestApp::new().await;
    let admin = TestApp::admin();
    let customer = TestApp::customer();
    place_orders(&app, &customer, &[3, 1, 5, 2, 4]).await;
    let orders = app.state.services.orders.clone();
    let sort = by_total(SortDirection::Asc);

    let mut seen = Vec::new();
    let mut cursor = None;
    loop {
        let page = orders
            .list_orders(
                &admin,
                OrderFilter::default(),
                sort,
                PageRequest {
                    page: None,
                    per_page: 2,
                    cursor: cursor.clone(),
                },
            )
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        seen.extend(page.items.iter().map(|o| o.total));
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    assert_eq!(seen.len(), 5);
    let mut sorted = seen.clone();
    sorted.sort();
    assert_eq!(seen, sorted);
}

#[tokio::test]
async fn cursor_is_stable_when_new_orders_arrive() {
    let app = TestApp::new().await;
    let admin = TestApp::admin();
    let customer = TestApp::customer();
    let ids = place_orders(&app, &customer, &[1, 1, 1, 1]).await;
    let orders = app.state.services.orders.clone();

    // newest first
    let first = orders
        .list_orders(
            &admin,
            OrderFilter::default(),
            OrderSort::default(),
            PageRequest {
                per_page: 2,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(
        first.items.iter().map(|o| o.id).collect::<Vec<_>>(),
        vec![ids[3], ids[2]]
    );

    place_orders(&app, &customer, &[1]).await;

    let second = orders
        .list_orders(
            &admin,
            OrderFilter::default(),
            OrderSort::default(),
            PageRequest {
                per_page: 2,
                cursor: first.next_cursor.clone(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(
        second.items.iter().map(|o| o.id).collect::<Vec<_>>(),
        vec![ids[1], ids[0]]
    );
    assert_eq!(second.next_cursor, None);
}

#[tokio::test]
async fn cursor_from_another_sort_is_rejected() {
    let app = TestApp::new().await;
    let admin = TestApp::admin();
    place_orders(&app, &TestApp::customer(), &[1, 2, 3]).await;
    let orders = app.state.services.orders.clone();

    let page = orders
        .list_orders(
            &admin,
            OrderFilter::default(),
            by_total(SortDirection::Desc),
            PageRequest {
                per_page: 1,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    // 3 x 10,000 + 15,000 shipping + 3,300 tax
    assert_eq!(page.items[0].total, dec!(48300));

    assert_matches!(
        orders
            .list_orders(
                &admin,
                OrderFilter::default(),
                OrderSort::default(),
                PageRequest {
                    per_page: 1,
                    cursor: page.next_cursor,
                    ..Default::default()
                },
            )
            .await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        orders
            .list_orders(
                &admin,
                OrderFilter::default(),
                OrderSort::default(),
                PageRequest {
                    per_page: 1,
                    cursor: Some("garbage".to_string()),
                    ..Default::default()
                },
            )
            .await,
        Err(ServiceError::ValidationError(_))
    );
}

#[tokio::test]
async fn numbered_pages_and_limits() {
    let app = TestApp::new().await;
    let admin = TestApp::admin();
    place_orders(&app, &TestApp::customer(), &[1, 2, 3, 4, 5]).await;
    let orders = app.state.services.orders.clone();

    let page = orders
        .list_orders(
            &admin,
            OrderFilter::default(),
            by_total(SortDirection::Asc),
            PageRequest {
                page: Some(3),
                per_page: 2,
                cursor: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(page.page, Some(3));
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.next_cursor, None);

    for per_page in [0, 101] {
        assert_matches!(
            orders
                .list_orders(
                    &admin,
                    OrderFilter::default(),
                    OrderSort::default(),
                    PageRequest {
                        per_page,
                        ..Default::default()
                    },
                )
                .await,
            Err(ServiceError::ValidationError(_))
        );
    }
}

#[tokio::test]
async fn page_numbers_past_the_addressable_range_are_rejected() {
    let app = TestApp::new().await;
    let customer = TestApp::customer();
    place_orders(&app, &customer, &[1]).await;

    let err = app
        .state
        .services
        .orders
        .list_customer_orders(
            &customer,
            OrderSort::default(),
            PageRequest {
                page: Some(u64::MAX),
                per_page: 20,
                cursor: None,
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn search_treats_wildcards_as_text() {
    let app = TestApp::new().await;
    let admin = TestApp::admin();
    let mug = app.seed_product("Mug", dec!(10000), 100).await;
    let mut ids = Vec::new();
    for name in ["Toko 50% Diskon", "Toko 500 Rasa", "Toko_Lima"] {
        let customer = TestApp::customer();
        app.add_to_cart(&customer, mug.id, 1).await;
        let mut info = contact();
        info.name = name.to_string();
        let order = app
            .state
            .services
            .checkout
            .create_order(&customer, info)
            .await
            .unwrap();
        ids.push(order.order.id);
    }
    let orders = app.state.services.orders.clone();

    for (search, expected) in [("50%", ids[0]), ("o_L", ids[2])] {
        let page = orders
            .list_orders(
                &admin,
                OrderFilter {
                    search: Some(search.to_string()),
                    ..Default::default()
                },
                OrderSort::default(),
                PageRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(page.total, 1, "search {:?}", search);
        assert_eq!(page.items[0].id, expected);
    }
}

#[tokio::test]
async fn filters_narrow_the_listing() {
    let app = TestApp::new().await;
    let admin = TestApp::admin();
    let ids = place_orders(&app, &TestApp::customer(), &[1, 2, 3]).await;
    let status = app.state.services.order_status.clone();
    status
        .update_status(&admin, ids[0], OrderStatus::Processing, None)
        .await
        .unwrap();
    status
        .update_payment_status(&admin, ids[1], PaymentStatus::Paid, None)
        .await
        .unwrap();
    let orders = app.state.services.orders.clone();

    let processing = orders
        .list_orders(
            &admin,
            OrderFilter {
                status: Some(OrderStatus::Processing),
                ..Default::default()
            },
            OrderSort::default(),
            PageRequest::default(),
        )
        .await
        .unwrap();
    assert_eq!(processing.total, 1);
    assert_eq!(processing.items[0].id, ids[0]);

    let paid = orders
        .list_orders(
            &admin,
            OrderFilter {
                payment_status: Some(PaymentStatus::Paid),
                ..Default::default()
            },
            OrderSort::default(),
            PageRequest::default(),
        )
        .await
        .unwrap();
    assert_eq!(paid.total, 1);
    assert_eq!(paid.items[0].id, ids[1]);

    let target = orders.get_order(&admin, ids[2]).await.unwrap();
    let found = orders
        .list_orders(
            &admin,
            OrderFilter {
                search: Some(target.order.order_number.clone()),
                ..Default::default()
            },
            OrderSort::default(),
            PageRequest::default(),
        )
        .await
        .unwrap();
    assert_eq!(found.total, 1);
    assert_eq!(found.items[0].id, ids[2]);

    let future = orders
        .list_orders(
            &admin,
            OrderFilter {
                from: Some(chrono::Utc::now() + chrono::Duration::hours(1)),
                ..Default::default()
            },
            OrderSort::default(),
            PageRequest::default(),
        )
        .await
        .unwrap();
    assert_eq!(future.total, 0);
}

#[tokio::test]
async fn customers_only_see_their_own_orders() {
    let app = TestApp::new().await;
    let alice = TestApp::customer();
    let bob = TestApp::customer();
    let alices = place_orders(&app, &alice, &[1, 2]).await;
    let bobs = place_orders(&app, &bob, &[1]).await;
    let orders = app.state.services.orders.clone();

    let page = orders
        .list_customer_orders(&alice, OrderSort::default(), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(page.total, 2);
    assert!(page.items.iter().all(|o| alices.contains(&o.id)));

    assert!(orders.get_customer_order(&alice, alices[0]).await.is_ok());
    assert_matches!(
        orders.get_customer_order(&alice, bobs[0]).await,
        Err(ServiceError::NotFound(_))
    );

    // the admin listing is not for customers
    assert_matches!(
        orders
            .list_orders(
                &alice,
                OrderFilter::default(),
                OrderSort::default(),
                PageRequest::default()
            )
            .await,
        Err(ServiceError::ForbiddenOperation(_))
    );
}

#[tokio::test]
async fn shipping_info_can_be_corrected_by_admins() {
    let app = TestApp::new().await;
    let admin = TestApp::admin();
    let ids = place_orders(&app, &TestApp::customer(), &[2]).await;
    let orders = app.state.services.orders.clone();
    let before = orders.get_order(&admin, ids[0]).await.unwrap();

    let updated = orders
        .update_shipping_info(
            &admin,
            ids[0],
            ShippingInfoUpdate {
                shipping_address: Some("Jl. Sudirman 5, Bandung".to_string()),
                expected_version: Some(before.order.version),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.order.shipping_address, "Jl. Sudirman 5, Bandung");
    assert_eq!(updated.order.contact_name, before.order.contact_name);
    assert_eq!(updated.order.total, before.order.total);
    assert_eq!(updated.items, before.items);
    assert_eq!(updated.order.version, before.order.version + 1);

    assert_matches!(
        orders
            .update_shipping_info(
                &admin,
                ids[0],
                ShippingInfoUpdate {
                    contact_phone: Some("+62 811".to_string()),
                    expected_version: Some(before.order.version),
                    ..Default::default()
                },
            )
            .await,
        Err(ServiceError::PersistenceConflict { .. })
    );
    assert_matches!(
        orders
            .update_shipping_info(&admin, ids[0], ShippingInfoUpdate::default())
            .await,
        Err(ServiceError::ValidationError(_))
    );
}
