use super::*;
use crate::{
    error::Error,
    marker::{self, Claim},
    resource::Resource,
    site::Site,
    test_utils::{self, at},
    transport::LocalMover,
};
use assert_matches::assert_matches;
use std::collections::BTreeMap;
use tokio::fs;

#[tokio::test(flavor = "multi_thread")]
async fn round_trip() {
    let (_dir, catalog) = test_utils::create_catalog("S1").await;
    test_utils::register(&catalog, &["l0", "l1"]).await;

    let p1 = test_utils::store(&catalog, test_utils::product(&catalog, "l0", 0)).await;
    let p2 = test_utils::store(&catalog, test_utils::product(&catalog, "l0", 5)).await;

    let site = catalog.config().site.clone();
    let product = Product::new("l1", test_utils::pass(), at(10, 0), at(10, 10))
        .with_resource("A", Resource::at(&site, "l1/a.hdf").with_description("geolocation"))
        .with_resource("B", Resource::at(&site, "l1/b.hdf"))
        .with_thumbnail(Resource::at(&site, "l1/thumb.jpg"))
        .with_contributor(Resource::at(&site, "anc/leapsec.dat"))
        .with_ancestor(p1)
        .with_ancestor(p2)
        .with_algorithm("agent-1", "l0l1", "6.1")
        .with_subproduct("modis")
        .with_attribute("day_night", "day")
        .with_attribute("granule", "0100");

    let id = catalog.store_product(&product).await.unwrap();
    let loaded = catalog.load_product(id).await.unwrap();

    assert_eq!(loaded.id, Some(id));
    assert_eq!(loaded.product_type, "l1");
    assert_eq!(loaded.start_time, product.start_time);
    assert_eq!(loaded.stop_time, product.stop_time);
    assert_eq!(loaded.ancestors, product.ancestors);
    assert_eq!(loaded.attributes, product.attributes);
    assert_eq!(loaded.algorithm_version.as_deref(), Some("6.1"));
    assert_eq!(loaded.pass.spacecraft, "AQUA");
    assert_eq!(loaded.thumbnails.len(), 1);
    assert_eq!(loaded.contributors.len(), 1);

    let names: BTreeMap<_, _> = loaded
        .resources
        .iter()
        .map(|(key, resource)| (key.as_str(), resource.name.as_str()))
        .collect();
    assert_eq!(names, BTreeMap::from([("A", "a.hdf"), ("B", "b.hdf")]));
    assert_eq!(
        loaded.resource("A").unwrap().description.as_deref(),
        Some("geolocation")
    );
    assert!(loaded.resources_are_local().unwrap());
    assert!(!loaded.resource("A").unwrap().published);
}

#[tokio::test(flavor = "multi_thread")]
async fn store_requires_resources_and_registered_type() {
    let (_dir, catalog) = test_utils::create_catalog("S1").await;

    let bare = Product::new("l0", test_utils::pass(), at(10, 0), at(10, 5));
    assert_matches!(
        catalog.store_product(&bare).await,
        Err(Error::NoResources)
    );

    assert_matches!(
        catalog
            .store_product(&test_utils::product(&catalog, "l0", 0))
            .await,
        Err(Error::UnknownProductType(name)) => assert_eq!(name, "l0")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn distribution_site_publishes() {
    let (_dir, catalog) = test_utils::create_catalog("IS").await;
    test_utils::register(&catalog, &["l0"]).await;

    let id = test_utils::store(&catalog, test_utils::product(&catalog, "l0", 0)).await;
    let product = catalog.load_product(id).await.unwrap();

    assert!(product.resource("data").unwrap().published);
}

#[tokio::test(flavor = "multi_thread")]
async fn cascading_delete() {
    let (_dir, catalog) = test_utils::create_catalog("S1").await;
    test_utils::register(&catalog, &["l0", "l1", "l2"]).await;

    let root = test_utils::store(&catalog, test_utils::product(&catalog, "l0", 0)).await;
    let child = test_utils::store(
        &catalog,
        test_utils::product(&catalog, "l1", 0).with_ancestor(root),
    )
    .await;
    let grandchild = test_utils::store(
        &catalog,
        test_utils::product(&catalog, "l2", 0).with_ancestor(child),
    )
    .await;

    {
        let mut tx = catalog.pool().begin_write().await.unwrap();
        for id in [root, child, grandchild] {
            assert_matches!(
                marker::claim(&mut tx, id, "level2", "S1@localhost:1").await.unwrap(),
                Claim::Won(_)
            );
        }
        tx.commit().await.unwrap();
    }

    let pass_id = catalog.load_product(root).await.unwrap().pass.id.unwrap();

    let removed = catalog.remove_products(&[root], None).await.unwrap();
    assert_eq!(removed, [grandchild, child, root]);

    for id in [root, child, grandchild] {
        assert_matches!(
            catalog.load_product(id).await,
            Err(Error::ProductNotFound(_))
        );
        assert!(catalog.markers_for_product(id).await.unwrap().is_empty());
    }

    let mut conn = catalog.pool().acquire().await.unwrap();
    for table in ["resources", "resource_sites", "ancestors"] {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(count, 0, "{table}");
    }

    assert_matches!(
        catalog.load_pass(pass_id).await,
        Err(Error::PassNotFound(_))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_refused_when_descendant_protected() {
    let (_dir, catalog) = test_utils::create_catalog("S1").await;
    test_utils::register(&catalog, &["l0", "l1"]).await;

    let root = test_utils::store(&catalog, test_utils::product(&catalog, "l0", 0)).await;
    let child = test_utils::store(
        &catalog,
        test_utils::product(&catalog, "l1", 0)
            .with_ancestor(root)
            .protected(),
    )
    .await;

    assert_matches!(
        catalog.remove_products(&[root], None).await,
        Err(Error::DeleteProtected(id)) => assert_eq!(id, child)
    );

    // Nothing was removed.
    catalog.load_product(root).await.unwrap();
    catalog.load_product(child).await.unwrap();

    catalog.set_product_protected(child, false).await.unwrap();
    assert_eq!(
        catalog.remove_products(&[root], None).await.unwrap(),
        [child, root]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn pass_shared_by_other_product_survives() {
    let (_dir, catalog) = test_utils::create_catalog("S1").await;
    test_utils::register(&catalog, &["l0"]).await;

    let a = test_utils::store(&catalog, test_utils::product(&catalog, "l0", 0)).await;
    let b = test_utils::store(&catalog, test_utils::product(&catalog, "l0", 5)).await;
    let pass_id = catalog.load_product(a).await.unwrap().pass.id.unwrap();

    catalog.remove_products(&[a], None).await.unwrap();
    catalog.load_pass(pass_id).await.unwrap();

    catalog.remove_products(&[b], None).await.unwrap();
    assert_matches!(
        catalog.load_pass(pass_id).await,
        Err(Error::PassNotFound(_))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn shared_published_contributor_is_kept() {
    let (dir, catalog) = test_utils::create_catalog("IS").await;
    test_utils::register(&catalog, &["l1"]).await;

    let site = catalog.config().site.clone();
    let contributor_path = site.absolute("anc/leapsec.dat");
    let owned_path = site.absolute("l1/l1.00.dat");
    for path in [&contributor_path, &owned_path] {
        fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        fs::write(path, b"x").await.unwrap();
    }

    let a = test_utils::store(
        &catalog,
        test_utils::product(&catalog, "l1", 0)
            .with_contributor(Resource::at(&site, "anc/leapsec.dat")),
    )
    .await;
    let contributor = catalog.load_product(a).await.unwrap().contributors[0].clone();
    assert!(contributor.published);

    let b = test_utils::store(
        &catalog,
        test_utils::product(&catalog, "l1", 5).with_contributor(contributor.clone()),
    )
    .await;

    let mover = LocalMover::new(Site::new("S1", "localhost", dir.path().join("S1")), site);

    assert_eq!(
        catalog.remove_products(&[a], Some(&mover)).await.unwrap(),
        [a]
    );
    assert!(!fs::try_exists(&owned_path).await.unwrap());
    assert!(fs::try_exists(&contributor_path).await.unwrap());
    assert_eq!(
        catalog.load_product(b).await.unwrap().contributors[0].id,
        contributor.id
    );

    catalog.remove_products(&[b], Some(&mover)).await.unwrap();
    assert!(!fs::try_exists(&contributor_path).await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn published_files_survive_refused_removal() {
    let (dir, catalog) = test_utils::create_catalog("IS").await;
    test_utils::register(&catalog, &["l0", "l1"]).await;

    let site = catalog.config().site.clone();
    let path = site.absolute("l0/l0.00.dat");
    fs::create_dir_all(path.parent().unwrap()).await.unwrap();
    fs::write(&path, b"x").await.unwrap();

    let root = test_utils::store(&catalog, test_utils::product(&catalog, "l0", 0)).await;
    test_utils::store(
        &catalog,
        test_utils::product(&catalog, "l1", 0)
            .with_ancestor(root)
            .protected(),
    )
    .await;

    let mover = LocalMover::new(Site::new("S1", "localhost", dir.path().join("S1")), site);

    assert_matches!(
        catalog.remove_products(&[root], Some(&mover)).await,
        Err(Error::DeleteProtected(_))
    );
    assert!(fs::try_exists(&path).await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn marker_inferred_from_ancestors() {
    let (_dir, catalog) = test_utils::create_catalog("S1").await;
    test_utils::register(&catalog, &["l0", "l1"]).await;
    catalog.register_algorithm("l0l1", "level1").await.unwrap();

    let root = test_utils::store(&catalog, test_utils::product(&catalog, "l0", 0)).await;

    let marker_id = {
        let mut tx = catalog.pool().begin_write().await.unwrap();
        let Claim::Won(marker_id) = marker::claim(&mut tx, root, "level1", "S1@localhost:1")
            .await
            .unwrap()
        else {
            panic!("claim lost");
        };
        tx.commit().await.unwrap();
        marker_id
    };

    let child = test_utils::store(
        &catalog,
        test_utils::product(&catalog, "l1", 0)
            .with_ancestor(root)
            .with_algorithm("agent", "l0l1", "1"),
    )
    .await;

    assert_eq!(
        catalog.load_product(child).await.unwrap().marker_id,
        Some(marker_id)
    );
    assert_eq!(
        catalog.find_controlling_marker(child).await.unwrap(),
        Some(marker_id)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn unmapped_algorithm() {
    let (_dir, catalog) = test_utils::create_catalog("S1").await;
    test_utils::register(&catalog, &["l0", "l1"]).await;

    let root = test_utils::store(
        &catalog,
        test_utils::product(&catalog, "l0", 0).with_algorithm("agent", "manual", "1"),
    )
    .await;
    let child = test_utils::store(
        &catalog,
        test_utils::product(&catalog, "l1", 0)
            .with_ancestor(root)
            .with_algorithm("agent", "legacy", "1"),
    )
    .await;

    // Loading tolerates the missing mapping.
    assert_eq!(catalog.load_product(child).await.unwrap().marker_id, None);

    assert_eq!(catalog.find_controlling_marker(root).await.unwrap(), None);
    assert_matches!(
        catalog.find_controlling_marker(child).await,
        Err(Error::MissingGroupMapping { algorithm, product }) => {
            assert_eq!(algorithm, "legacy");
            assert_eq!(product, child);
        }
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn roots_of_pass() {
    let (_dir, catalog) = test_utils::create_catalog("S1").await;
    test_utils::register(&catalog, &["l0", "l1"]).await;

    let a = test_utils::store(&catalog, test_utils::product(&catalog, "l0", 0)).await;
    let b = test_utils::store(&catalog, test_utils::product(&catalog, "l0", 5)).await;
    let _child = test_utils::store(
        &catalog,
        test_utils::product(&catalog, "l1", 0)
            .with_ancestor(a)
            .with_ancestor(b),
    )
    .await;

    let pass_id = catalog.load_product(a).await.unwrap().pass.id.unwrap();
    assert_eq!(
        catalog.root_products_of_pass(pass_id).await.unwrap(),
        [a, b]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn product_without_resources_is_removed() {
    let (_dir, catalog) = test_utils::create_catalog("S1").await;
    test_utils::register(&catalog, &["l0"]).await;

    let id = test_utils::store(&catalog, test_utils::product(&catalog, "l0", 0)).await;
    assert!(!catalog.check_product_resources(id).await.unwrap());

    {
        let mut conn = catalog.pool().acquire().await.unwrap();
        sqlx::query("DELETE FROM resources WHERE product = ?")
            .bind(id)
            .execute(&mut *conn)
            .await
            .unwrap();
    }

    assert!(catalog.check_product_resources(id).await.unwrap());
    assert_matches!(
        catalog.load_product(id).await,
        Err(Error::ProductNotFound(_))
    );
}
