use crate::{
    db,
    error::{Error, Result},
    marker,
    pass::{self, PassId},
    product::ProductId,
    resource,
};
use std::{
    collections::{BTreeSet, HashMap, HashSet, VecDeque},
    path::PathBuf,
};

pub(super) struct Removal {
    /// Removed products, descendants before their ancestors.
    pub products: Vec<ProductId>,
    /// Distribution site copies of the removed resources, relative to that site's data root.
    pub published_files: Vec<PathBuf>,
}

/// Removes `roots` and all their descendants from the catalog. Files are not touched; the
/// distribution site copies of the removed resources are returned so the caller can delete them
/// once the removal is committed.
pub(super) async fn remove(
    conn: &mut db::Connection,
    roots: &[ProductId],
    distribution_site: &str,
) -> Result<Removal> {
    let children = discover(conn, roots).await?;
    let order = dependency_order(roots, &children);

    // Check everything up front so a refusal leaves no partial removal behind.
    let mut passes = BTreeSet::new();
    let mut present = Vec::with_capacity(order.len());

    for id in order {
        let row: Option<(bool, PassId)> =
            sqlx::query_as("SELECT delete_protected, pass FROM products WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?;

        let Some((protected, pass)) = row else {
            tracing::debug!(product = %id, "product already removed");
            continue;
        };

        if protected {
            return Err(Error::DeleteProtected(id));
        }

        passes.insert(pass);
        present.push(id);
    }

    let mut published_files = Vec::new();

    for id in &present {
        published_files.extend(published_paths(conn, *id, distribution_site).await?);
        remove_one(conn, *id).await?;
    }

    for pass in passes {
        if pass::remove_if_orphaned(conn, pass).await? {
            tracing::debug!(%pass, "removed orphaned pass");
        }
    }

    Ok(Removal {
        products: present,
        published_files,
    })
}

/// Breadth-first walk over the ancestry edges from `roots` towards descendants. Returns the
/// children of every visited product.
async fn discover(
    conn: &mut db::Connection,
    roots: &[ProductId],
) -> Result<HashMap<ProductId, Vec<ProductId>>> {
    let mut children = HashMap::new();
    let mut queue: VecDeque<_> = roots.iter().copied().collect();
    let mut visited: HashSet<_> = roots.iter().copied().collect();

    while let Some(id) = queue.pop_front() {
        let descendants: Vec<ProductId> =
            sqlx::query_scalar("SELECT product FROM ancestors WHERE ancestor = ? ORDER BY product")
                .bind(id)
                .fetch_all(&mut *conn)
                .await?;

        for descendant in &descendants {
            if visited.insert(*descendant) {
                queue.push_back(*descendant);
            }
        }

        children.insert(id, descendants);
    }

    Ok(children)
}

/// Orders the discovered products so every product comes after all of its descendants.
/// Terminates even if the ancestry edges contain a cycle.
fn dependency_order(
    roots: &[ProductId],
    children: &HashMap<ProductId, Vec<ProductId>>,
) -> Vec<ProductId> {
    let mut order = Vec::with_capacity(children.len());
    let mut entered = HashSet::new();
    let mut stack: Vec<(ProductId, bool)> = roots.iter().rev().map(|id| (*id, false)).collect();

    while let Some((id, expanded)) = stack.pop() {
        if expanded {
            order.push(id);
            continue;
        }

        if !entered.insert(id) {
            continue;
        }

        stack.push((id, true));

        for child in children.get(&id).into_iter().flatten().rev() {
            if !entered.contains(child) {
                stack.push((*child, false));
            }
        }
    }

    order
}

/// Paths at the distribution site of the resources that removing `id` deletes. Must be called
/// before the removal itself, and after the products removed earlier in the same transaction
/// are gone, so that contributors shared only among removed products are included exactly once.
async fn published_paths(
    conn: &mut db::Connection,
    id: ProductId,
    distribution_site: &str,
) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    for resource_id in resource::removable_ids_for_product(conn, id).await? {
        let Some(resource) = resource::load(conn, resource_id, distribution_site).await? else {
            continue;
        };

        if let Some(location) = &resource.local {
            paths.push(location.directory.join(&resource.name));
        }
    }

    Ok(paths)
}

async fn remove_one(conn: &mut db::Connection, id: ProductId) -> Result<()> {
    resource::remove_for_product(conn, id).await?;

    sqlx::query("DELETE FROM ancestors WHERE product = ? OR ancestor = ?")
        .bind(id)
        .bind(id)
        .execute(&mut *conn)
        .await?;

    marker::remove_for_product(conn, id).await?;

    sqlx::query("DELETE FROM attributes WHERE product = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    sqlx::query("DELETE FROM products WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: i64) -> ProductId {
        ProductId::new(n)
    }

    #[test]
    fn descendants_come_first() {
        // 1 -> 2 -> 4, 1 -> 3 -> 4
        let children = HashMap::from([
            (id(1), vec![id(2), id(3)]),
            (id(2), vec![id(4)]),
            (id(3), vec![id(4)]),
            (id(4), vec![]),
        ]);

        let order = dependency_order(&[id(1)], &children);
        let position = |n| order.iter().position(|x| *x == id(n)).unwrap();

        assert_eq!(order.len(), 4);
        assert!(position(4) < position(2));
        assert!(position(4) < position(3));
        assert!(position(2) < position(1));
        assert!(position(3) < position(1));
    }

    #[test]
    fn root_that_descends_from_another_root() {
        let children = HashMap::from([(id(1), vec![id(2)]), (id(2), vec![])]);
        assert_eq!(dependency_order(&[id(2), id(1)], &children), [id(2), id(1)]);
    }

    #[test]
    fn cycle_terminates() {
        let children = HashMap::from([(id(1), vec![id(2)]), (id(2), vec![id(1)])]);
        assert_eq!(dependency_order(&[id(1)], &children), [id(2), id(1)]);
    }
}
