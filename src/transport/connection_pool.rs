use std::collections::VecDeque;

use crate::util::fd::close_fd_quiet;

use super::connection::Connection;

/// Connection pool using slab allocation with a freelist
///
/// Slot ids double as the connection id packed into io_uring user data, so
/// a slot is only reused once every operation referencing it has completed.
pub struct ConnectionPool {
    slots: Vec<Option<Connection>>,
    freelist: VecDeque<usize>,
    live: usize,
}

impl ConnectionPool {
    pub fn new(initial_capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(initial_capacity),
            freelist: VecDeque::new(),
            live: 0,
        }
    }

    pub fn insert(&mut self, mut conn: Connection) -> usize {
        let id = match self.freelist.pop_front() {
            Some(id) => id,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };
        conn.id = id;
        self.slots[id] = Some(conn);
        self.live += 1;
        id
    }

    pub fn get(&self, id: usize) -> Option<&Connection> {
        self.slots.get(id).and_then(|c| c.as_ref())
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection> {
        self.slots.get_mut(id).and_then(|c| c.as_mut())
    }

    /// Close the connection's fd and free its slot.
    pub fn release(&mut self, id: usize) -> Option<Connection> {
        let conn = self.slots.get_mut(id).and_then(|c| c.take())?;
        if conn.fd >= 0 {
            close_fd_quiet(conn.fd);
        }
        self.freelist.push_back(id);
        self.live -= 1;
        Some(conn)
    }

    pub fn ids(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(id, c)| c.as_ref().map(|_| id))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.slots.iter().filter_map(|c| c.as_ref())
    }

    pub fn len(&self) -> usize {
        self.live
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        for conn in self.slots.iter_mut().filter_map(|c| c.take()) {
            if conn.fd >= 0 {
                close_fd_quiet(conn.fd);
            }
        }
    }
}
