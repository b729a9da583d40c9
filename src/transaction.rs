use bytes::Bytes;

/// MULTI/EXEC/DISCARD state for one connection. Commands issued between
/// MULTI and EXEC are queued verbatim and replayed in order on EXEC.
#[derive(Debug, Default)]
pub struct Transaction {
    in_multi: bool,
    queued: Vec<Vec<Bytes>>,
}

impl Transaction {
    pub fn new() -> Transaction {
        Transaction::default()
    }

    pub fn in_multi(&self) -> bool {
        self.in_multi
    }

    /// Starts a transaction. Returns `false` when one is already open;
    /// MULTI calls cannot be nested.
    pub fn begin(&mut self) -> bool {
        if self.in_multi {
            return false;
        }
        self.in_multi = true;
        self.queued.clear();
        true
    }

    pub fn queue(&mut self, args: Vec<Bytes>) {
        self.queued.push(args);
    }

    /// Closes the transaction and hands back the queued commands for
    /// execution. `None` when no transaction is open.
    pub fn take(&mut self) -> Option<Vec<Vec<Bytes>>> {
        if !self.in_multi {
            return None;
        }
        self.in_multi = false;
        Some(std::mem::take(&mut self.queued))
    }

    /// Drops the queue. Returns `false` when no transaction is open.
    pub fn discard(&mut self) -> bool {
        if !self.in_multi {
            return false;
        }
        self.in_multi = false;
        self.queued.clear();
        true
    }
}
