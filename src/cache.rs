//! 并发缓存原语
//!
//! - `SingleFlightCache`: 按键的单飞缓存。同一键并发请求时只有一个线程执行加载，
//!   其余线程阻塞等待结果。缓存只保存弱引用，最后一个持有者释放后条目过期。
//! - `SharedResourcesContainer`: 引用计数的共享资源表。首个请求者得到"承诺"，
//!   负责生产资源；后来者得到"期货"，在承诺兑现后取得同一份资源。
//!
//! 两者都基于 DashMap，分片锁只在短临界区内持有，阻塞等待一律在分片锁之外进行。

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};

// ============================================================================
// 单飞缓存
// ============================================================================

const STATE_UNDEFINED: u8 = 0;
const STATE_LOADING: u8 = 1;
const STATE_LOADED: u8 = 2;

struct CacheEntry<V> {
    state: AtomicU8,
    data: Mutex<Option<Weak<V>>>,
    loaded: Condvar,
}

impl<V> CacheEntry<V> {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_UNDEFINED),
            data: Mutex::new(None),
            loaded: Condvar::new(),
        }
    }

    /// 已加载且数据已被全部持有者释放 (或加载失败)
    fn is_expired(&self) -> bool {
        if self.state.load(Ordering::Acquire) != STATE_LOADED {
            return false;
        }
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.as_ref().map_or(true, |weak| weak.strong_count() == 0)
    }

    fn finish(&self, value: Option<Weak<V>>) {
        {
            let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
            *data = value;
            self.state.store(STATE_LOADED, Ordering::Release);
        }
        self.loaded.notify_all();
    }
}

pub struct SingleFlightCache<K, V> {
    entries: DashMap<K, Arc<CacheEntry<V>>>,
    loads: AtomicUsize,
}

impl<K, V> Default for SingleFlightCache<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SingleFlightCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            loads: AtomicUsize::new(0),
        }
    }

    /// 取得键对应的值，必要时调用 `loader` 加载
    ///
    /// 并发请求同一键时 `loader` 只执行一次。加载失败时条目被移除，
    /// 等待中的线程会重新竞争加载权。
    pub fn obtain<E, F>(&self, key: &K, mut loader: F) -> Result<Arc<V>, E>
    where
        F: FnMut() -> Result<Arc<V>, E>,
    {
        loop {
            let entry = self
                .entries
                .entry(key.clone())
                .or_insert_with(|| Arc::new(CacheEntry::new()))
                .value()
                .clone();

            if entry
                .state
                .compare_exchange(
                    STATE_UNDEFINED,
                    STATE_LOADING,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                self.loads.fetch_add(1, Ordering::Relaxed);
                let guard = LoadGuard {
                    cache: self,
                    key,
                    entry: &entry,
                };
                let value = loader()?;
                std::mem::forget(guard);
                entry.finish(Some(Arc::downgrade(&value)));
                return Ok(value);
            }

            {
                let mut data = entry.data.lock().unwrap_or_else(|e| e.into_inner());
                while entry.state.load(Ordering::Acquire) != STATE_LOADED {
                    data = entry.loaded.wait(data).unwrap_or_else(|e| e.into_inner());
                }
                if let Some(value) = data.as_ref().and_then(Weak::upgrade) {
                    return Ok(value);
                }
            }
            // 过期或加载失败的条目，移除后重试
            self.remove_entry(key, &entry);
        }
    }

    /// 若已缓存且仍存活则直接返回
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let entry = self.entries.get(key)?.value().clone();
        if entry.state.load(Ordering::Acquire) != STATE_LOADED {
            return None;
        }
        let data = entry.data.lock().unwrap_or_else(|e| e.into_inner());
        data.as_ref().and_then(Weak::upgrade)
    }

    /// 移除已过期的条目 (值的 Drop 中调用)
    pub fn detach(&self, key: &K) {
        self.entries.remove_if(key, |_, entry| entry.is_expired());
    }

    /// 累计执行过的加载次数
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn remove_entry(&self, key: &K, entry: &Arc<CacheEntry<V>>) {
        self.entries
            .remove_if(key, |_, current| Arc::ptr_eq(current, entry));
    }
}

/// 加载期间持有；加载出错或 loader panic 时撤销条目并唤醒等待者
struct LoadGuard<'a, K, V>
where
    K: Eq + Hash + Clone,
{
    cache: &'a SingleFlightCache<K, V>,
    key: &'a K,
    entry: &'a Arc<CacheEntry<V>>,
}

impl<K, V> Drop for LoadGuard<'_, K, V>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        self.entry.finish(None);
        self.cache.remove_entry(self.key, self.entry);
    }
}

// ============================================================================
// 承诺 / 期货
// ============================================================================

enum PromiseState<V> {
    Pending,
    Fulfilled(Arc<V>),
    Broken,
}

struct PromiseCell<V> {
    state: Mutex<PromiseState<V>>,
    ready: Condvar,
}

impl<V> PromiseCell<V> {
    fn new() -> Self {
        Self {
            state: Mutex::new(PromiseState::Pending),
            ready: Condvar::new(),
        }
    }

    fn settle(&self, outcome: PromiseState<V>) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if matches!(*state, PromiseState::Pending) {
                *state = outcome;
            }
        }
        self.ready.notify_all();
    }
}

/// 等待另一个请求者生产的共享资源
pub struct SharedFuture<V> {
    cell: Arc<PromiseCell<V>>,
}

impl<V> SharedFuture<V> {
    /// 阻塞直到承诺兑现；承诺被撤销时返回 None
    pub fn wait(&self) -> Option<Arc<V>> {
        let mut state = self.cell.state.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            match &*state {
                PromiseState::Pending => {
                    state = self.cell.ready.wait(state).unwrap_or_else(|e| e.into_inner());
                }
                PromiseState::Fulfilled(value) => return Some(value.clone()),
                PromiseState::Broken => return None,
            }
        }
    }
}

impl<V> std::fmt::Debug for SharedFuture<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedFuture").finish_non_exhaustive()
    }
}

// ============================================================================
// 共享资源表
// ============================================================================

enum Slot<V> {
    Available { value: Arc<V>, refs: usize },
    Promised { cell: Arc<PromiseCell<V>>, waiters: usize },
}

/// 请求共享资源的结果
pub enum Obtained<V> {
    /// 资源已可用，引用计数已加一
    Reference(Arc<V>),
    /// 资源正在由别人生产，兑现后计入引用
    Future(SharedFuture<V>),
    /// 调用者负责生产资源，之后必须兑现或撤销
    Promise,
}

pub struct SharedResourcesContainer<K, V> {
    slots: DashMap<K, Slot<V>>,
}

impl<K, V> Default for SharedResourcesContainer<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SharedResourcesContainer<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    pub fn obtain_reference_or_future_or_make_promise(&self, key: &K) -> Obtained<V> {
        match self.slots.entry(key.clone()) {
            Entry::Occupied(mut occupied) => match occupied.get_mut() {
                Slot::Available { value, refs } => {
                    *refs += 1;
                    Obtained::Reference(value.clone())
                }
                Slot::Promised { cell, waiters } => {
                    *waiters += 1;
                    Obtained::Future(SharedFuture { cell: cell.clone() })
                }
            },
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::Promised {
                    cell: Arc::new(PromiseCell::new()),
                    waiters: 0,
                });
                Obtained::Promise
            }
        }
    }

    /// 兑现承诺：资源变为可用，引用数 = 生产者 1 + 等待者数
    pub fn fulfil_promise_and_reference(&self, key: &K, value: Arc<V>) -> Arc<V> {
        let mut settled = None;
        match self.slots.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                match slot {
                    Slot::Promised { cell, waiters } => {
                        let refs = 1 + *waiters;
                        settled = Some(cell.clone());
                        *slot = Slot::Available {
                            value: value.clone(),
                            refs,
                        };
                    }
                    Slot::Available { value: existing, refs } => {
                        tracing::warn!("fulfilling a resource that is already available");
                        *refs += 1;
                        return existing.clone();
                    }
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::Available {
                    value: value.clone(),
                    refs: 1,
                });
            }
        }
        if let Some(cell) = settled {
            cell.settle(PromiseState::Fulfilled(value.clone()));
        }
        value
    }

    /// 撤销承诺：条目被移除，等待者得到 None
    pub fn break_promise(&self, key: &K) {
        let removed = self
            .slots
            .remove_if(key, |_, slot| matches!(slot, Slot::Promised { .. }));
        if let Some((_, Slot::Promised { cell, .. })) = removed {
            cell.settle(PromiseState::Broken);
        }
    }

    /// 释放一次引用；返回条目是否因此被移除
    pub fn release_reference(&self, key: &K) -> bool {
        let exhausted = match self.slots.get_mut(key) {
            Some(mut slot) => match &mut *slot {
                Slot::Available { refs, .. } => {
                    *refs = refs.saturating_sub(1);
                    *refs == 0
                }
                Slot::Promised { .. } => false,
            },
            None => false,
        };
        if exhausted {
            return self
                .slots
                .remove_if(key, |_, slot| matches!(slot, Slot::Available { refs: 0, .. }))
                .is_some();
        }
        false
    }

    /// 当前引用数 (承诺中的条目为 None)
    pub fn references(&self, key: &K) -> Option<usize> {
        match &*self.slots.get(key)? {
            Slot::Available { refs, .. } => Some(*refs),
            Slot::Promised { .. } => None,
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

// ============================================================================
// RAII 守卫
// ============================================================================

/// 持有一组共享引用，Drop 时逐个释放
pub struct ReferenceLease<K, V>
where
    K: Eq + Hash + Clone,
{
    container: Arc<SharedResourcesContainer<K, V>>,
    keys: Vec<K>,
}

impl<K, V> ReferenceLease<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(container: Arc<SharedResourcesContainer<K, V>>) -> Self {
        Self {
            container,
            keys: Vec::new(),
        }
    }

    pub fn push(&mut self, key: K) {
        self.keys.push(key);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl<K, V> Drop for ReferenceLease<K, V>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        for key in self.keys.drain(..) {
            self.container.release_reference(&key);
        }
    }
}

/// 记录尚未兑现的承诺，Drop 时撤销剩余的承诺
pub struct PromiseGuard<'c, K, V>
where
    K: Eq + Hash + Clone,
{
    container: &'c SharedResourcesContainer<K, V>,
    pending: Vec<K>,
}

impl<'c, K, V> PromiseGuard<'c, K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(container: &'c SharedResourcesContainer<K, V>) -> Self {
        Self {
            container,
            pending: Vec::new(),
        }
    }

    pub fn add(&mut self, key: K) {
        self.pending.push(key);
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.contains(key)
    }

    /// 兑现并移出待办；不在待办中时返回 None
    pub fn fulfil(&mut self, key: &K, value: Arc<V>) -> Option<Arc<V>> {
        let index = self.pending.iter().position(|k| k == key)?;
        self.pending.swap_remove(index);
        Some(self.container.fulfil_promise_and_reference(key, value))
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl<K, V> Drop for PromiseGuard<'_, K, V>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        for key in self.pending.drain(..) {
            self.container.break_promise(&key);
        }
    }
}
