//! List mutations that can be applied ahead of server confirmation.

use crate::error::SyncError;

/// An element of an optimistic list.
pub trait OptimisticItem: Clone + Send + Sync + 'static {
  /// Partial update accepted by [`OptimisticAction::Update`]
  type Patch: Clone + Send + Sync + 'static;

  /// Unique within a list at all times
  fn id(&self) -> &str;

  fn apply_patch(&mut self, patch: &Self::Patch);

  /// Renumber sort positions after a confirmed reorder that landed an item
  /// on index `moved`. Items without a sort key keep the default no-op.
  fn resequence(_items: &mut [Self], _moved: usize)
  where
    Self: Sized,
  {
  }

  /// Move the item at `index` to where its sort key says it belongs after
  /// an update. Unordered items stay put.
  fn place(_items: &mut Vec<Self>, _index: usize)
  where
    Self: Sized,
  {
  }
}

#[derive(Debug, Clone)]
pub enum OptimisticAction<T: OptimisticItem> {
  Add(T),
  Update { id: String, patch: T::Patch },
  Delete { id: String },
  Reorder { from: usize, to: usize },
}

impl<T: OptimisticItem> OptimisticAction<T> {
  pub fn kind(&self) -> &'static str {
    match self {
      OptimisticAction::Add(_) => "add",
      OptimisticAction::Update { .. } => "update",
      OptimisticAction::Delete { .. } => "delete",
      OptimisticAction::Reorder { .. } => "reorder",
    }
  }

  /// `type_identifier`; two actions with the same id are duplicates.
  pub fn action_id(&self) -> String {
    match self {
      OptimisticAction::Add(item) => format!("add_{}", item.id()),
      OptimisticAction::Update { id, .. } => format!("update_{}", id),
      OptimisticAction::Delete { id } => format!("delete_{}", id),
      OptimisticAction::Reorder { from, to } => format!("reorder_{}_{}", from, to),
    }
  }

  /// Apply to a copy of `items`. The input is never modified.
  pub fn apply(&self, items: &[T]) -> Result<Vec<T>, SyncError> {
    match self {
      OptimisticAction::Add(item) => {
        if position(items, item.id()).is_some() {
          return Err(SyncError::DuplicateId {
            id: item.id().to_string(),
          });
        }
        let mut next = items.to_vec();
        next.push(item.clone());
        Ok(next)
      }
      OptimisticAction::Update { id, patch } => {
        let index = position(items, id).ok_or_else(|| not_found(id))?;
        let mut next = items.to_vec();
        next[index].apply_patch(patch);
        T::place(&mut next, index);
        Ok(next)
      }
      OptimisticAction::Delete { id } => {
        let index = position(items, id).ok_or_else(|| not_found(id))?;
        let mut next = items.to_vec();
        next.remove(index);
        Ok(next)
      }
      OptimisticAction::Reorder { from, to } => {
        for index in [*from, *to] {
          if index >= items.len() {
            return Err(SyncError::InvalidIndex {
              index,
              len: items.len(),
            });
          }
        }
        let mut next = items.to_vec();
        let item = next.remove(*from);
        next.insert(*to, item);
        Ok(next)
      }
    }
  }

  /// Undo only this action against `current`, which may contain changes
  /// made after it. `baseline` is the list as it was before this action.
  pub fn revert(&self, current: &[T], baseline: &[T]) -> Vec<T> {
    let mut next = current.to_vec();
    match self {
      OptimisticAction::Add(item) => {
        next.retain(|existing| existing.id() != item.id());
      }
      OptimisticAction::Update { id, .. } => {
        if let (Some(index), Some(original)) = (
          position(&next, id),
          baseline.iter().find(|original| original.id() == id),
        ) {
          next[index] = original.clone();
          T::place(&mut next, index);
        }
      }
      OptimisticAction::Delete { id } => {
        if position(&next, id).is_none() {
          if let Some(index) = position(baseline, id) {
            next.insert(index.min(next.len()), baseline[index].clone());
          }
        }
      }
      OptimisticAction::Reorder { from, to } => {
        let moved = baseline.get(*from).map(|item| item.id());
        let landed = next.get(*to).map(|item| item.id());
        if moved.is_some() && moved == landed {
          let item = next.remove(*to);
          next.insert((*from).min(next.len()), item);
        }
      }
    }
    next
  }
}

pub(crate) fn position<T: OptimisticItem>(items: &[T], id: &str) -> Option<usize> {
  items.iter().position(|item| item.id() == id)
}

fn not_found(id: &str) -> SyncError {
  SyncError::NotFound { id: id.to_string() }
}

#[cfg(test)]
pub(crate) mod testing {
  use super::OptimisticItem;

  /// Minimal positioned item for engine tests.
  #[derive(Debug, Clone, PartialEq, Eq)]
  pub struct Card {
    pub id: String,
    pub title: String,
    pub position: u32,
  }

  impl Card {
    pub fn new(id: &str, position: u32) -> Self {
      Self {
        id: id.to_string(),
        title: id.to_uppercase(),
        position,
      }
    }
  }

  impl OptimisticItem for Card {
    type Patch = String;

    fn id(&self) -> &str {
      &self.id
    }

    fn apply_patch(&mut self, title: &String) {
      self.title = title.clone();
    }

    fn resequence(items: &mut [Self], _moved: usize) {
      for (position, item) in items.iter_mut().enumerate() {
        item.position = position as u32;
      }
    }
  }

  pub fn cards(ids: &[&str]) -> Vec<Card> {
    ids
      .iter()
      .enumerate()
      .map(|(i, id)| Card::new(id, i as u32))
      .collect()
  }

  pub fn ids(items: &[Card]) -> Vec<&str> {
    items.iter().map(|c| c.id.as_str()).collect()
  }
}
