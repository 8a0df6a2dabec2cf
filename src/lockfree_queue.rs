//! Unbounded multi-producer multi-consumer FIFO queue.
//!
//! A singly linked list with a permanent dummy head: `head` points at the dummy, whose successor
//! holds the oldest value; `tail` points at the newest node or lags one step behind it. Every
//! thread that sees `tail` lagging helps advancing it, so no operation waits on a slow peer.
//! Nodes unlinked from `head` are freed at once if no hazard pointer publishes them, otherwise
//! they are retired to the global domain.
//!
use domain;
use domain::LocalHazards;
use error::{EnqueueError, Result};
use retire::ReclaimPolicy;
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use util;
use util::WrappedAlign64Type;

type FIFONodePtr<T> = *mut FIFONode<T>;

struct FIFONode<T> {
    // initialized from enqueue until the node becomes the dummy head
    value: UnsafeCell<MaybeUninit<T>>,
    next: AtomicPtr<FIFONode<T>>,
}

impl<T> FIFONode<T> {
    fn dummy() -> Self {
        FIFONode {
            value: UnsafeCell::new(MaybeUninit::uninit()),
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }

    fn new(value: T) -> Self {
        FIFONode {
            value: UnsafeCell::new(MaybeUninit::new(value)),
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }

    #[inline]
    fn next(&self) -> FIFONodePtr<T> {
        self.next.load(Ordering::SeqCst)
    }

    /// Move the value out. Only the thread whose CAS made this node the new head may call it,
    /// exactly once.
    #[inline]
    unsafe fn take_value(&self) -> T {
        ptr::read((*self.value.get()).as_ptr())
    }
}

/// Lock-free FIFO queue, nodes reclaimed through the global hazard pointer domain.
///
/// # Examples
///
/// ```
/// use rs_lockfree_queue::lockfree_queue::LockFreeQueue;
/// use std::sync::Arc;
/// use std::thread;
///
/// let queue = Arc::new(LockFreeQueue::new());
/// let producer = {
///     let queue = queue.clone();
///     thread::spawn(move || {
///         for i in 0..100 {
///             queue.enqueue(i);
///         }
///     })
/// };
/// producer.join().unwrap();
/// assert_eq!(queue.dequeue(), Some(0));
/// ```
///
pub struct LockFreeQueue<T> {
    head: WrappedAlign64Type<AtomicPtr<FIFONode<T>>>,
    tail: WrappedAlign64Type<AtomicPtr<FIFONode<T>>>,
    active_operations: AtomicUsize,
    policy: ReclaimPolicy,
    _marker: PhantomData<T>,
}

unsafe impl<T: Send> Send for LockFreeQueue<T> {}

unsafe impl<T: Send> Sync for LockFreeQueue<T> {}

impl<T> Default for LockFreeQueue<T> {
    fn default() -> Self {
        LockFreeQueue::new()
    }
}

impl<T> LockFreeQueue<T> {
    /// Empty queue, reclaiming after every dequeue that leaves retired nodes behind.
    pub fn new() -> LockFreeQueue<T> {
        Self::with_policy(ReclaimPolicy::default())
    }

    /// Empty queue whose dequeues run opportunistic reclaim passes as `policy` says.
    ///
    /// # Examples
    ///
    /// ```
    /// use rs_lockfree_queue::lockfree_queue::LockFreeQueue;
    /// use rs_lockfree_queue::retire::ReclaimPolicy;
    ///
    /// let queue = LockFreeQueue::with_policy(ReclaimPolicy::new(64, 200000));
    /// queue.enqueue("a");
    /// assert_eq!(queue.dequeue(), Some("a"));
    /// ```
    ///
    pub fn with_policy(policy: ReclaimPolicy) -> LockFreeQueue<T> {
        let dummy = Box::into_raw(Box::new(FIFONode::<T>::dummy()));
        LockFreeQueue {
            head: WrappedAlign64Type(AtomicPtr::new(dummy)),
            tail: WrappedAlign64Type(AtomicPtr::new(dummy)),
            active_operations: AtomicUsize::new(0),
            policy,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn policy(&self) -> ReclaimPolicy {
        self.policy
    }

    /// Count of enqueue / dequeue calls currently in flight. Diagnostic only.
    #[inline]
    pub fn active_operations(&self) -> usize {
        self.active_operations.load(Ordering::Relaxed)
    }

    /// Append `value`.
    ///
    /// # Panics
    ///
    /// If the current thread can not claim hazard pointers, see `try_enqueue`.
    pub fn enqueue(&self, value: T) {
        if let Err(e) = self.try_enqueue(value) {
            panic!("{}", e);
        }
    }

    /// Append `value`, or give it back if the current thread can not claim hazard pointers.
    pub fn try_enqueue(&self, value: T) -> ::std::result::Result<(), EnqueueError<T>> {
        let mut value = Some(value);
        match domain::with_local_hazards(|hazards| {
            if let Some(v) = value.take() {
                unsafe { self.inner_enqueue(hazards, v) }
            }
        }) {
            Ok(()) => Ok(()),
            Err(error) => value
                .take()
                .map_or(Ok(()), |value| Err(EnqueueError { error, value })),
        }
    }

    /// Remove the oldest value. `None` means the queue was empty when looked at.
    ///
    /// # Panics
    ///
    /// If the current thread can not claim hazard pointers, see `try_dequeue`.
    pub fn dequeue(&self) -> Option<T> {
        self.try_dequeue().unwrap_or_else(|e| panic!("{}", e))
    }

    pub fn try_dequeue(&self) -> Result<Option<T>> {
        domain::with_local_hazards(|hazards| unsafe { self.inner_dequeue(hazards) })
    }

    /// Snapshot emptiness check, may be stale as soon as it returns.
    ///
    /// # Panics
    ///
    /// If the current thread can not claim hazard pointers, see `try_dequeue`.
    pub fn is_empty(&self) -> bool {
        domain::with_local_hazards(|hazards| unsafe {
            let head = hazards.primary.protect_load(&*self.head);
            let empty = (*head).next().is_null();
            hazards.primary.clear();
            empty
        }).unwrap_or_else(|e| panic!("{}", e))
    }

    unsafe fn inner_enqueue(&self, hazards: &LocalHazards, value: T) {
        self.active_operations.fetch_add(1, Ordering::Relaxed);
        let node = Box::into_raw(Box::new(FIFONode::new(value)));
        let hp_tail = &hazards.primary;
        let mut tail;
        loop {
            tail = hp_tail.protect_load(&*self.tail);
            let next = (*tail).next();
            if tail == self.tail.load(Ordering::SeqCst) {
                if next.is_null() {
                    if (*tail)
                        .next
                        .compare_exchange(next, node, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        break;
                    }
                } else {
                    // someone linked a node but has not moved tail yet
                    let _ = self.tail.compare_exchange(
                        tail,
                        next,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    );
                }
            }
            util::pause();
        }
        // may already have been advanced by a helper
        let _ = self.tail
            .compare_exchange(tail, node, Ordering::SeqCst, Ordering::SeqCst);
        hp_tail.clear();
        self.active_operations.fetch_sub(1, Ordering::Relaxed);
    }

    unsafe fn inner_dequeue(&self, hazards: &LocalHazards) -> Option<T> {
        self.active_operations.fetch_add(1, Ordering::Relaxed);
        let hp_head = &hazards.primary;
        let hp_next = &hazards.secondary;
        let ret;
        loop {
            let head = hp_head.protect_load(&*self.head);
            let next = (*head).next();
            hp_next.protect(next);
            // head unchanged after publishing next, so next can not have been unlinked yet
            if head != self.head.load(Ordering::SeqCst) {
                continue;
            }
            if next.is_null() {
                ret = None;
                break;
            }
            if head == self.tail.load(Ordering::SeqCst) {
                let _ =
                    self.tail
                        .compare_exchange(head, next, Ordering::SeqCst, Ordering::SeqCst);
            } else if self.head
                .compare_exchange(head, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                // next is the new dummy, its value belongs to us
                let value = (*next).take_value();
                hazards.clear();
                let hazard_domain = domain::global();
                hazard_domain.retire_or_free(head);
                hazard_domain.reclaim_with(&self.policy);
                ret = Some(value);
                break;
            }
            util::pause();
        }
        hazards.clear();
        self.active_operations.fetch_sub(1, Ordering::Relaxed);
        ret
    }

    unsafe fn destroy(&mut self) {
        let dummy = *self.head.get_mut();
        let mut curr = (*dummy).next();
        drop(Box::from_raw(dummy));
        while !curr.is_null() {
            let node = Box::from_raw(curr);
            curr = node.next();
            ptr::drop_in_place((*node.value.get()).as_mut_ptr());
        }
        *self.head.get_mut() = ptr::null_mut();
        *self.tail.get_mut() = ptr::null_mut();
    }
}

/// Frees every node and drops the values still queued. No other thread may be operating on the
/// queue once drop starts; this is not checked.
impl<T> Drop for LockFreeQueue<T> {
    fn drop(&mut self) {
        let active = *self.active_operations.get_mut();
        if active != 0 {
            warn!("queue dropped with {} operations in flight", active);
        }
        unsafe {
            self.destroy();
        }
        domain::global().reclaim();
    }
}

#[cfg(test)]
mod test {
    use domain;
    use lockfree_queue::{FIFONode, LockFreeQueue};
    use std::cell::RefCell;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::thread;

    struct Node<'a, T> {
        cnt: &'a RefCell<i32>,
        v: T,
    }

    impl<'a, T> Drop for Node<'a, T> {
        fn drop(&mut self) {
            *self.cnt.borrow_mut() += 1;
        }
    }

    #[test]
    fn test_base() {
        let queue = LockFreeQueue::new();
        assert!(queue.dequeue().is_none());
        assert!(queue.is_empty());
        queue.enqueue(1);
        assert!(!queue.is_empty());
        assert_eq!(queue.dequeue().unwrap(), 1);
        let test_num = 100;
        for i in 0..test_num {
            queue.enqueue(i);
        }
        for i in 0..test_num {
            assert_eq!(queue.dequeue().unwrap(), i);
        }
        assert!(queue.dequeue().is_none());
        assert_eq!(queue.active_operations(), 0);
    }

    #[test]
    fn test_ten_in_order() {
        let queue = LockFreeQueue::new();
        for i in 0..10 {
            queue.enqueue(i);
        }
        let got = (0..10).filter_map(|_| queue.dequeue()).collect::<Vec<_>>();
        assert_eq!(got, (0..10).collect::<Vec<_>>());
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_memory_leak() {
        let cnt = RefCell::new(0);
        let queue = LockFreeQueue::new();
        let test_num = 100;
        for i in 0..test_num {
            queue.enqueue(Node { cnt: &cnt, v: i });
        }
        assert_eq!(*cnt.borrow(), 0);
        for i in 0..test_num {
            assert_eq!(queue.dequeue().unwrap().v, i);
        }
        assert_eq!(*cnt.borrow(), test_num);
    }

    #[test]
    fn test_drop_remaining() {
        let cnt = RefCell::new(0);
        {
            let queue = LockFreeQueue::new();
            for i in 0..10 {
                queue.enqueue(Node { cnt: &cnt, v: i });
            }
            for _ in 0..3 {
                queue.dequeue();
            }
            assert_eq!(*cnt.borrow(), 3);
        }
        assert_eq!(*cnt.borrow(), 10);
    }

    #[test]
    fn test_help_lagging_tail() {
        let queue = LockFreeQueue::new();
        queue.enqueue(1);
        unsafe {
            // linked but tail not advanced, as if the enqueuer stalled
            let tail = queue.tail.load(Ordering::SeqCst);
            let node = Box::into_raw(Box::new(FIFONode::new(2)));
            (*tail).next.store(node, Ordering::SeqCst);
        }
        queue.enqueue(3);
        assert_eq!(queue.dequeue(), Some(1));
        assert_eq!(queue.dequeue(), Some(2));
        assert_eq!(queue.dequeue(), Some(3));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_dequeue_helps_tail_on_dummy() {
        let queue = LockFreeQueue::new();
        unsafe {
            let dummy = queue.head.load(Ordering::SeqCst);
            let node = Box::into_raw(Box::new(FIFONode::new(7)));
            (*dummy).next.store(node, Ordering::SeqCst);
        }
        assert_eq!(queue.dequeue(), Some(7));
        assert_eq!(queue.head.load(Ordering::SeqCst), queue.tail.load(Ordering::SeqCst));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_stalled_reader_keeps_node_alive() {
        let queue = Arc::new(LockFreeQueue::new());
        for i in 0..10 {
            queue.enqueue(i);
        }
        // a reader that published the dummy head and then stopped running
        let owner = domain::global().acquire().unwrap();
        let stalled = owner.protect_load(&*queue.head);

        let drained = {
            let queue = queue.clone();
            thread::spawn(move || {
                let mut v = vec![];
                while let Some(i) = queue.dequeue() {
                    v.push(i);
                }
                v
            }).join()
                .unwrap()
        };
        assert_eq!(drained, (0..10).collect::<Vec<_>>());
        assert!(domain::global().table().is_protected(stalled));
        unsafe {
            assert!(!(*stalled).next().is_null());
        }
        drop(owner);
        domain::global().reclaim();
    }

    #[test]
    fn test_send_sync() {
        fn is_send_sync<T: Send + Sync>() {}
        is_send_sync::<LockFreeQueue<Vec<u8>>>();
    }
}
