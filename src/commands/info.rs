use crate::replication::Replication;
use crate::resp;

/// `INFO [section]` replies with the replication section regardless of
/// which section was asked for; it is the only one this server populates.
#[derive(Debug, PartialEq)]
pub struct Info;

impl Info {
    pub fn exec(self, repl: &Replication) -> Vec<u8> {
        let body = format!(
            "# Replication\nrole:{}\nmaster_replid:{}\nmaster_repl_offset:{}",
            repl.role().as_str(),
            repl.replid(),
            repl.offset(),
        );
        let mut buf = Vec::new();
        resp::append_bulk_str(&mut buf, &body);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::{Role, REPLICATION_ID};

    #[test]
    fn reports_role_and_offset() {
        let repl = Replication::new(Role::Master);
        repl.add_offset(37);

        let reply = Info.exec(&repl);

        let text = String::from_utf8(reply).unwrap();
        assert!(text.contains("role:master"));
        assert!(text.contains(&format!("master_replid:{}", REPLICATION_ID)));
        assert!(text.contains("master_repl_offset:37"));
    }

    #[test]
    fn replica_role_is_slave() {
        let repl = Replication::new(Role::Replica);

        let reply = Info.exec(&repl);

        assert!(String::from_utf8(reply).unwrap().contains("role:slave"));
    }
}
