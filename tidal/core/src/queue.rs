// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! A blocking FIFO queue which is capable of closing the input end.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{Result, TidalError};

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A FIFO of elements with a monotonic `closed` flag.
///
/// Consumers block in [`take`](Self::take) or [`peek`](Self::peek) until an
/// element is available or the queue is closed. Closing is idempotent and
/// wakes all waiters, which makes the queue usable for producer/consumer
/// hand-offs that need a graceful shutdown.
pub struct ClosableQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
}

impl<T> Default for ClosableQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ClosableQueue<T> {
    /// Creates an empty open queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Appends an element.
    ///
    /// Fails with [`TidalError::QueueClosed`] if the input end has been closed.
    pub fn put(&self, element: T) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(TidalError::QueueClosed(
                    "the input end of this queue has been closed".to_string(),
                ));
            }
            state.items.push_back(element);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Retrieves and removes the head of this queue, waiting if necessary.
    ///
    /// Returns `None` if the queue is empty and has been closed.
    pub async fn take(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if let Some(element) = state.items.pop_front() {
                    if !state.items.is_empty() {
                        // At most one wakeup is buffered, so pass it on.
                        self.notify.notify_one();
                    }
                    return Some(element);
                }
                if state.closed {
                    // Pass the wakeup on so every other waiter drains too.
                    self.notify.notify_one();
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Marks the input end of this queue as closed, waking all waiters.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    /// Returns true once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of elements currently queued.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Returns true if no elements are queued.
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }
}

impl<T: Clone> ClosableQueue<T> {
    /// Retrieves, but does not remove, the head of this queue, waiting if necessary.
    ///
    /// Returns `None` if the queue is empty and has been closed.
    pub async fn peek(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            {
                let state = self.state.lock();
                if let Some(element) = state.items.front() {
                    // The element stays queued, so the wakeup must survive for
                    // the consumer that will actually take it.
                    self.notify.notify_one();
                    return Some(element.clone());
                }
                if state.closed {
                    self.notify.notify_one();
                    return None;
                }
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn take_preserves_fifo_order() {
        let queue = ClosableQueue::new();
        queue.put(1).unwrap();
        queue.put(2).unwrap();
        queue.put(3).unwrap();

        assert_eq!(Some(1), queue.take().await);
        assert_eq!(Some(2), queue.take().await);
        assert_eq!(Some(3), queue.take().await);
    }

    #[tokio::test]
    async fn take_blocks_until_put() {
        let queue = Arc::new(ClosableQueue::new());

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.take().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.put(42).unwrap();

        assert_eq!(Some(42), consumer.await.unwrap());
    }

    #[tokio::test]
    async fn peek_is_non_destructive() {
        let queue = ClosableQueue::new();
        queue.put("a").unwrap();

        assert_eq!(Some("a"), queue.peek().await);
        assert_eq!(Some("a"), queue.peek().await);
        assert_eq!(Some("a"), queue.take().await);
    }

    #[tokio::test]
    async fn close_unblocks_all_waiters() {
        let queue: Arc<ClosableQueue<u32>> = Arc::new(ClosableQueue::new());

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.take().await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        for waiter in waiters {
            assert_eq!(None, waiter.await.unwrap());
        }
    }

    #[tokio::test]
    async fn put_after_close_fails() {
        let queue = ClosableQueue::new();
        queue.close();
        queue.close();

        assert!(matches!(queue.put(1), Err(TidalError::QueueClosed(_))));
    }

    #[tokio::test]
    async fn closed_queue_drains_remaining_elements() {
        let queue = ClosableQueue::new();
        queue.put(1).unwrap();
        queue.put(2).unwrap();
        queue.close();

        assert_eq!(Some(1), queue.take().await);
        assert_eq!(Some(2), queue.take().await);
        assert_eq!(None, queue.take().await);
    }
}
