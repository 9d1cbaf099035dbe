use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use crate::domain::{Category, CategoryId, iso_timestamp};
use crate::error::SpectraError;
use crate::store::{Store, Tables};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryNode {
    pub id: CategoryId,
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<CategoryId>,
    pub children: Vec<CategoryNode>,
}

// Deep chains would otherwise drop one stack frame per level.
impl Drop for CategoryNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CategoryDraft {
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<CategoryId>,
}

impl CategoryDraft {
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn child(name: impl Into<String>, parent_id: CategoryId) -> Self {
        Self {
            name: name.into(),
            parent_id: Some(parent_id),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

pub struct CategoryTree<'a> {
    store: &'a Store,
}

impl<'a> CategoryTree<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn create(&self, draft: CategoryDraft) -> Result<Category, SpectraError> {
        let name = normalize_name(&draft.name)?;
        let category = self.store.transaction(|tables| {
            check_placement(tables, &name, draft.parent_id, None)?;
            let category = Category {
                id: tables.next_category_id(),
                name,
                description: draft.description,
                parent_id: draft.parent_id,
                created_at: iso_timestamp(),
            };
            tables.insert_category(category.clone());
            Ok(category)
        })?;
        tracing::info!(id = %category.id, name = %category.name, "created category");
        Ok(category)
    }

    pub fn update(&self, id: CategoryId, draft: CategoryDraft) -> Result<Category, SpectraError> {
        let name = normalize_name(&draft.name)?;
        let category = self.store.transaction(|tables| {
            if tables.category(id).is_none() {
                return Err(SpectraError::CategoryNotFound(id));
            }
            check_placement(tables, &name, draft.parent_id, Some(id))?;
            if let Some(parent_id) = draft.parent_id {
                if parent_id == id || descendants(tables, id).contains(&parent_id) {
                    return Err(SpectraError::CategoryCycle { id, parent_id });
                }
            }
            let category = tables
                .category_mut(id)
                .ok_or(SpectraError::CategoryNotFound(id))?;
            category.name = name;
            category.description = draft.description;
            category.parent_id = draft.parent_id;
            Ok(category.clone())
        })?;
        tracing::info!(id = %category.id, name = %category.name, "updated category");
        Ok(category)
    }

    pub fn delete(&self, id: CategoryId) -> Result<(), SpectraError> {
        self.store.transaction(|tables| {
            if tables.category(id).is_none() {
                return Err(SpectraError::CategoryNotFound(id));
            }
            if tables.children_of(id).next().is_some() {
                return Err(SpectraError::CategoryHasChildren(id));
            }
            tables.remove_category(id);
            for dataset in tables.datasets_mut() {
                if dataset.category_id == Some(id) {
                    dataset.category_id = None;
                }
            }
            Ok(())
        })?;
        tracing::info!(id = %id, "deleted category");
        Ok(())
    }

    pub fn get(&self, id: CategoryId) -> Result<Category, SpectraError> {
        self.store
            .read(|tables| tables.category(id).cloned())?
            .ok_or(SpectraError::CategoryNotFound(id))
    }

    pub fn list_flat(&self) -> Result<Vec<Category>, SpectraError> {
        self.store
            .read(|tables| tables.categories().cloned().collect())
    }

    pub fn tree(&self) -> Result<Vec<CategoryNode>, SpectraError> {
        self.store.read(build_tree)
    }
}

fn normalize_name(name: &str) -> Result<String, SpectraError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(SpectraError::EmptyCategoryName);
    }
    Ok(trimmed.to_string())
}

fn check_placement(
    tables: &Tables,
    name: &str,
    parent_id: Option<CategoryId>,
    excluding: Option<CategoryId>,
) -> Result<(), SpectraError> {
    if let Some(parent_id) = parent_id {
        if tables.category(parent_id).is_none() {
            return Err(SpectraError::ParentCategoryNotFound(parent_id));
        }
    }
    if tables.find_sibling(name, parent_id, excluding).is_some() {
        return Err(SpectraError::DuplicateCategory {
            name: name.to_string(),
            parent_id,
        });
    }
    Ok(())
}

fn descendants(tables: &Tables, id: CategoryId) -> HashSet<CategoryId> {
    let mut found = HashSet::new();
    let mut stack = vec![id];
    while let Some(current) = stack.pop() {
        for child in tables.children_of(current) {
            if found.insert(child.id) {
                stack.push(child.id);
            }
        }
    }
    found
}

fn build_tree(tables: &Tables) -> Vec<CategoryNode> {
    let mut by_parent: BTreeMap<Option<CategoryId>, Vec<&Category>> = BTreeMap::new();
    for category in tables.categories() {
        by_parent
            .entry(category.parent_id)
            .or_default()
            .push(category);
    }

    let mut visited = HashSet::new();
    let mut preorder = Vec::new();
    let mut stack = by_parent
        .get(&None)
        .map(|roots| roots.iter().rev().copied().collect::<Vec<_>>())
        .unwrap_or_default();
    while let Some(category) = stack.pop() {
        if !visited.insert(category.id) {
            tracing::warn!(id = %category.id, "category reached twice while building tree");
            continue;
        }
        preorder.push(category);
        if let Some(children) = by_parent.get(&Some(category.id)) {
            stack.extend(children.iter().rev().copied());
        }
    }

    // Reverse pre-order finishes every subtree before its parent.
    let mut built: HashMap<Option<CategoryId>, Vec<CategoryNode>> = HashMap::new();
    for category in preorder.into_iter().rev() {
        let mut children = built.remove(&Some(category.id)).unwrap_or_default();
        children.reverse();
        built
            .entry(category.parent_id)
            .or_default()
            .push(CategoryNode {
                id: category.id,
                name: category.name.clone(),
                description: category.description.clone(),
                parent_id: category.parent_id,
                children,
            });
    }
    let mut roots = built.remove(&None).unwrap_or_default();
    roots.reverse();
    roots
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_orders_children_by_id() {
        let store = Store::in_memory();
        let tree = CategoryTree::new(&store);
        let root = tree.create(CategoryDraft::root("Spectroscopy")).unwrap();
        let b = tree.create(CategoryDraft::child("b", root.id)).unwrap();
        let a = tree.create(CategoryDraft::child("a", root.id)).unwrap();

        let nodes = tree.tree().unwrap();
        assert_eq!(nodes.len(), 1);
        let ids = nodes[0]
            .children
            .iter()
            .map(|node| node.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![b.id, a.id]);
    }

    #[test]
    fn descendants_cover_whole_subtree() {
        let store = Store::in_memory();
        let tree = CategoryTree::new(&store);
        let root = tree.create(CategoryDraft::root("root")).unwrap();
        let mid = tree.create(CategoryDraft::child("mid", root.id)).unwrap();
        let leaf = tree.create(CategoryDraft::child("leaf", mid.id)).unwrap();

        let found = store.read(|tables| descendants(tables, root.id)).unwrap();
        assert!(found.contains(&mid.id));
        assert!(found.contains(&leaf.id));
        assert!(!found.contains(&root.id));
    }
}
