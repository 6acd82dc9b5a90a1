//! Stage graph traversal and mutation.
//!
//! The graph lives entirely in the [`Store`]: every link is an id, and every
//! mutation is a short sequence of independent `save_*`/`delete_*` calls. A
//! failure halfway through a relink or cascade leaves the earlier calls
//! committed; callers see the error and nothing is retried.

use std::collections::HashSet;

use tracing::debug;

use crate::error::{Result, SendpostError};
use crate::model::{Parameters, SendpostId, Stage, StageId};
use crate::store::Store;

// ---------------------------------------------------------------------------
// Traversal
// ---------------------------------------------------------------------------

/// Top-level stages of a sendpost in chain order.
///
/// Follows `next_stage_id` from the sendpost's first stage until the link
/// runs out. A link back to an already visited stage is reported as
/// [`SendpostError::ChainCycle`] rather than looped over.
pub fn chain(store: &dyn Store, sendpost_id: SendpostId) -> Result<Vec<Stage>> {
    let mut stages = Vec::new();
    let mut seen = HashSet::new();
    let mut next = store.get_sendpost(sendpost_id)?.first_stage_id;

    while let Some(id) = next {
        if !seen.insert(id) {
            return Err(SendpostError::ChainCycle {
                sendpost: sendpost_id,
                stage: id,
            });
        }
        let stage = store.get_stage(id)?;
        next = stage.next_stage_id;
        stages.push(stage);
    }
    Ok(stages)
}

/// Direct children of a parallel stage. Order carries no meaning.
pub fn children(store: &dyn Store, stage_id: StageId) -> Result<Vec<Stage>> {
    let stage = store.get_stage(stage_id)?;
    if !stage.is_parallel() {
        return Err(SendpostError::NotParallel(stage_id));
    }
    store.sub_stages(stage.id)
}

// ---------------------------------------------------------------------------
// Insertion
// ---------------------------------------------------------------------------

/// Save `stage` and splice it into its sendpost's chain.
///
/// With a `previous` stage, the new stage takes over `previous`'s successor
/// and `previous` points at the new stage. Without one, the new stage becomes
/// the first stage and the old first stage, if any, follows it.
pub fn insert_stage(
    store: &dyn Store,
    stage: &mut Stage,
    previous: Option<StageId>,
) -> Result<()> {
    if stage.parent_stage_id.is_some() {
        return Err(SendpostError::LinkConflict(stage.id));
    }
    let mut sendpost = store.get_sendpost(stage.sendpost_id)?;

    match previous {
        Some(prev_id) => {
            let mut prev = store.get_stage(prev_id)?;
            if prev.sendpost_id != stage.sendpost_id {
                return Err(SendpostError::ForeignStage {
                    stage: prev.id,
                    owner: prev.sendpost_id,
                    expected: stage.sendpost_id,
                });
            }
            if prev.parent_stage_id.is_some() {
                return Err(SendpostError::LinkConflict(prev.id));
            }

            store.save_stage(stage)?;
            if prev.next_stage_id.is_some() {
                stage.set_next_stage(prev.next_stage_id)?;
                store.save_stage(stage)?;
            }
            prev.set_next_stage(Some(stage.id))?;
            store.save_stage(&mut prev)?;
        }
        None => {
            let old_first = sendpost.first_stage_id;
            store.save_stage(stage)?;
            sendpost.first_stage_id = Some(stage.id);
            store.save_sendpost(&mut sendpost)?;
            if old_first.is_some() {
                stage.set_next_stage(old_first)?;
                store.save_stage(stage)?;
            }
        }
    }

    debug!(
        sendpost_id = stage.sendpost_id,
        stage_id = stage.id,
        previous = ?previous,
        "stage inserted"
    );
    Ok(())
}

/// Save `stage` as a child of the parallel stage `parent_id`.
pub fn add_child(store: &dyn Store, parent_id: StageId, stage: &mut Stage) -> Result<()> {
    let parent = store.get_stage(parent_id)?;
    if !parent.is_parallel() {
        return Err(SendpostError::NotParallel(parent_id));
    }
    if parent.sendpost_id != stage.sendpost_id {
        return Err(SendpostError::ForeignStage {
            stage: parent.id,
            owner: parent.sendpost_id,
            expected: stage.sendpost_id,
        });
    }
    stage.set_parent_stage(parent_id)?;
    store.save_stage(stage)?;
    debug!(parent_id, stage_id = stage.id, "child stage added");
    Ok(())
}

// ---------------------------------------------------------------------------
// Deletion
// ---------------------------------------------------------------------------

/// Delete a stage, relinking its predecessor (or the sendpost's first-stage
/// reference) to its successor. Parallel stages take their children with
/// them, depth first.
pub fn delete_stage(store: &dyn Store, stage_id: StageId) -> Result<()> {
    let stage = store.get_stage(stage_id)?;

    if let Some(mut prev) = store.previous_stage(stage_id)? {
        prev.set_next_stage(stage.next_stage_id)?;
        store.save_stage(&mut prev)?;
    } else if stage.parent_stage_id.is_none() {
        let mut sendpost = store.get_sendpost(stage.sendpost_id)?;
        if sendpost.first_stage_id == Some(stage_id) {
            sendpost.first_stage_id = stage.next_stage_id;
            store.save_sendpost(&mut sendpost)?;
        }
    }

    if stage.is_parallel() {
        for child in store.sub_stages(stage_id)? {
            delete_stage(store, child.id)?;
        }
    }

    store.delete_stage(stage_id)?;
    debug!(sendpost_id = stage.sendpost_id, stage_id, "stage deleted");
    Ok(())
}

// ---------------------------------------------------------------------------
// In-place updates
// ---------------------------------------------------------------------------

/// Flip the `blocked` flag and return its new value.
pub fn toggle_blocked(store: &dyn Store, stage_id: StageId) -> Result<bool> {
    let mut stage = store.get_stage(stage_id)?;
    stage.blocked = !stage.blocked;
    store.save_stage(&mut stage)?;
    Ok(stage.blocked)
}

/// Replace a stage's parameter bag wholesale.
pub fn set_parameters(store: &dyn Store, stage_id: StageId, parameters: Parameters) -> Result<Stage> {
    let mut stage = store.get_stage(stage_id)?;
    stage.parameters = parameters;
    store.save_stage(&mut stage)?;
    Ok(stage)
}

// ---------------------------------------------------------------------------
// Copy
// ---------------------------------------------------------------------------

/// Duplicate the whole chain of `from` (children included, recursively) onto
/// `to`, keeping chain order. Copies start fresh: never run, no run id.
pub fn copy_stages(store: &dyn Store, from: SendpostId, to: SendpostId) -> Result<()> {
    let mut previous = None;
    for stage in chain(store, from)? {
        let mut copy = stage.duplicate(to);
        insert_stage(store, &mut copy, previous)?;
        copy_children(store, stage.id, &copy)?;
        previous = Some(copy.id);
    }
    Ok(())
}

fn copy_children(store: &dyn Store, source_id: StageId, target: &Stage) -> Result<()> {
    if !target.is_parallel() {
        return Ok(());
    }
    for child in store.sub_stages(source_id)? {
        let mut copy = child.duplicate(target.sendpost_id);
        add_child(store, target.id, &mut copy)?;
        copy_children(store, child.id, &copy)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Sendpost;
    use crate::store::MemoryStore;
    use crate::types::{StageType, StateType};

    fn sendpost(store: &MemoryStore) -> SendpostId {
        let mut sp = Sendpost::new("campaign");
        store.save_sendpost(&mut sp).unwrap();
        sp.id
    }

    fn append(store: &MemoryStore, sp: SendpostId, ty: StageType, dep: &str, prev: Option<StageId>) -> StageId {
        let mut stage = Stage::new(sp, ty, dep, Parameters::new());
        insert_stage(store, &mut stage, prev).unwrap();
        stage.id
    }

    fn child(store: &MemoryStore, sp: SendpostId, parent: StageId, ty: StageType, dep: &str) -> StageId {
        let mut stage = Stage::new(sp, ty, dep, Parameters::new());
        add_child(store, parent, &mut stage).unwrap();
        stage.id
    }

    fn deployments(store: &MemoryStore, sp: SendpostId) -> Vec<String> {
        chain(store, sp)
            .unwrap()
            .into_iter()
            .map(|s| s.deployment_id)
            .collect()
    }

    #[test]
    fn empty_sendpost_has_empty_chain() {
        let store = MemoryStore::new();
        let sp = sendpost(&store);
        assert!(chain(&store, sp).unwrap().is_empty());
    }

    #[test]
    fn insert_after_splices_into_chain() {
        let store = MemoryStore::new();
        let sp = sendpost(&store);
        let a = append(&store, sp, StageType::Sequential, "a", None);
        let c = append(&store, sp, StageType::Sequential, "c", Some(a));
        append(&store, sp, StageType::Sequential, "b", Some(a));

        assert_eq!(deployments(&store, sp), vec!["a", "b", "c"]);
        assert_eq!(store.get_stage(c).unwrap().next_stage_id, None);
    }

    #[test]
    fn insert_without_previous_becomes_first() {
        let store = MemoryStore::new();
        let sp = sendpost(&store);
        let x = append(&store, sp, StageType::Sequential, "x", None);
        let new = append(&store, sp, StageType::Sequential, "new", None);

        let record = store.get_sendpost(sp).unwrap();
        assert_eq!(record.first_stage_id, Some(new));
        assert_eq!(store.get_stage(new).unwrap().next_stage_id, Some(x));
        assert_eq!(deployments(&store, sp), vec!["new", "x"]);
    }

    #[test]
    fn chain_visits_each_stage_once() {
        let store = MemoryStore::new();
        let sp = sendpost(&store);
        let mut prev = None;
        for dep in ["s1", "s2", "s3", "s4"] {
            prev = Some(append(&store, sp, StageType::Sequential, dep, prev));
        }
        let ids: Vec<_> = chain(&store, sp).unwrap().into_iter().map(|s| s.id).collect();
        let unique: HashSet<_> = ids.iter().copied().collect();
        assert_eq!(ids.len(), 4);
        assert_eq!(unique.len(), 4);
    }

    #[test]
    fn cyclic_chain_is_reported() {
        let store = MemoryStore::new();
        let sp = sendpost(&store);
        let a = append(&store, sp, StageType::Sequential, "a", None);
        let b = append(&store, sp, StageType::Sequential, "b", Some(a));

        let mut tail = store.get_stage(b).unwrap();
        tail.next_stage_id = Some(a);
        store.save_stage(&mut tail).unwrap();

        let err = chain(&store, sp).unwrap_err();
        assert!(matches!(err, SendpostError::ChainCycle { stage, .. } if stage == a));
    }

    #[test]
    fn insert_after_foreign_stage_is_rejected() {
        let store = MemoryStore::new();
        let sp1 = sendpost(&store);
        let sp2 = sendpost(&store);
        let a = append(&store, sp1, StageType::Sequential, "a", None);

        let mut stage = Stage::new(sp2, StageType::Sequential, "b", Parameters::new());
        let err = insert_stage(&store, &mut stage, Some(a)).unwrap_err();
        assert!(matches!(err, SendpostError::ForeignStage { owner, expected, .. } if owner == sp1 && expected == sp2));
        assert_eq!(stage.id, 0, "nothing saved on validation failure");
    }

    #[test]
    fn add_child_requires_parallel_parent() {
        let store = MemoryStore::new();
        let sp = sendpost(&store);
        let seq = append(&store, sp, StageType::Sequential, "seq", None);

        let mut stage = Stage::new(sp, StageType::Sequential, "c", Parameters::new());
        let err = add_child(&store, seq, &mut stage).unwrap_err();
        assert!(matches!(err, SendpostError::NotParallel(id) if id == seq));
        assert!(matches!(children(&store, seq), Err(SendpostError::NotParallel(_))));
    }

    #[test]
    fn children_are_not_chain_links() {
        let store = MemoryStore::new();
        let sp = sendpost(&store);
        let par = append(&store, sp, StageType::Parallel, "par", None);
        let c = child(&store, sp, par, StageType::Sequential, "c");

        assert_eq!(children(&store, par).unwrap().len(), 1);
        assert_eq!(deployments(&store, sp), vec!["par"]);

        let mut stage = store.get_stage(c).unwrap();
        assert!(insert_stage(&store, &mut stage, None).is_err());
    }

    #[test]
    fn delete_relinks_predecessor_to_successor() {
        let store = MemoryStore::new();
        let sp = sendpost(&store);
        let p = append(&store, sp, StageType::Sequential, "p", None);
        let s = append(&store, sp, StageType::Sequential, "s", Some(p));
        let n = append(&store, sp, StageType::Sequential, "n", Some(s));

        delete_stage(&store, s).unwrap();

        assert_eq!(store.get_stage(p).unwrap().next_stage_id, Some(n));
        assert_eq!(deployments(&store, sp), vec!["p", "n"]);
        assert!(store.get_stage(s).unwrap_err().is_not_found());
    }

    #[test]
    fn delete_first_stage_moves_first_reference() {
        let store = MemoryStore::new();
        let sp = sendpost(&store);
        let a = append(&store, sp, StageType::Sequential, "a", None);
        let b = append(&store, sp, StageType::Sequential, "b", Some(a));

        delete_stage(&store, a).unwrap();
        assert_eq!(store.get_sendpost(sp).unwrap().first_stage_id, Some(b));

        delete_stage(&store, b).unwrap();
        assert_eq!(store.get_sendpost(sp).unwrap().first_stage_id, None);
    }

    #[test]
    fn delete_parallel_cascades_through_nested_children() {
        let store = MemoryStore::new();
        let sp = sendpost(&store);
        let par = append(&store, sp, StageType::Parallel, "par", None);
        let leaf = child(&store, sp, par, StageType::Sequential, "leaf");
        let inner = child(&store, sp, par, StageType::Parallel, "inner");
        let deep = child(&store, sp, inner, StageType::Observer, "deep");

        delete_stage(&store, par).unwrap();

        for id in [par, leaf, inner, deep] {
            assert!(store.get_stage(id).is_err(), "stage {id} should be gone");
        }
        assert_eq!(store.get_sendpost(sp).unwrap().first_stage_id, None);
    }

    #[test]
    fn toggle_and_replace_parameters() {
        let store = MemoryStore::new();
        let sp = sendpost(&store);
        let a = append(&store, sp, StageType::Sequential, "a", None);

        assert!(toggle_blocked(&store, a).unwrap());
        assert!(!toggle_blocked(&store, a).unwrap());

        let mut params = Parameters::new();
        params.insert("limit".into(), serde_json::json!(5));
        let updated = set_parameters(&store, a, params.clone()).unwrap();
        assert_eq!(updated.parameters, params);
        assert_eq!(store.get_stage(a).unwrap().parameters, params);
    }

    #[test]
    fn copy_preserves_order_and_nested_children() {
        let store = MemoryStore::new();
        let src = sendpost(&store);
        let a = append(&store, src, StageType::Sequential, "a", None);
        let b = append(&store, src, StageType::Parallel, "b", Some(a));
        append(&store, src, StageType::Observer, "e", Some(b));
        child(&store, src, b, StageType::Sequential, "c");
        let inner = child(&store, src, b, StageType::Parallel, "inner");
        child(&store, src, inner, StageType::Sequential, "d");

        let mut ran = store.get_stage(a).unwrap();
        ran.state = StateType::Completed;
        ran.run_id = Some("old-run".into());
        store.save_stage(&mut ran).unwrap();

        let dst = sendpost(&store);
        copy_stages(&store, src, dst).unwrap();

        let copied = chain(&store, dst).unwrap();
        let deps: Vec<_> = copied.iter().map(|s| s.deployment_id.as_str()).collect();
        assert_eq!(deps, vec!["a", "b", "e"]);
        assert!(copied.iter().all(|s| s.sendpost_id == dst));
        assert_eq!(copied[0].state, StateType::NeverRunning);
        assert_eq!(copied[0].run_id, None);

        let mut kids: Vec<_> = children(&store, copied[1].id).unwrap();
        kids.sort_by(|x, y| x.deployment_id.cmp(&y.deployment_id));
        assert_eq!(kids.len(), 2);
        assert_eq!(kids[0].deployment_id, "c");
        let grand = children(&store, kids[1].id).unwrap();
        assert_eq!(grand.len(), 1);
        assert_eq!(grand[0].deployment_id, "d");

        // Source untouched.
        assert_eq!(deployments(&store, src), vec!["a", "b", "e"]);
    }
}
