use std::collections::HashMap;

use crate::protocol::Topic;

/// Live broker subscriptions for one session
///
/// One subscription id per topic. Subscribing to a topic that is already
/// present issues a fresh id and hands back the old one so the caller can
/// UNSUBSCRIBE it; frames tagged with a retired id no longer resolve.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    by_topic: HashMap<Topic, String>,
    by_id: HashMap<String, Topic>,
    next_id: u64,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns (new id, replaced id)
    pub fn subscribe(&mut self, topic: Topic) -> (String, Option<String>) {
        let id = format!("sub-{}", self.next_id);
        self.next_id += 1;

        let replaced = self.by_topic.insert(topic.clone(), id.clone());
        if let Some(old) = &replaced {
            self.by_id.remove(old);
        }
        self.by_id.insert(id.clone(), topic);
        (id, replaced)
    }

    /// Remove a topic, returning its id if it was subscribed
    pub fn unsubscribe(&mut self, topic: &Topic) -> Option<String> {
        let id = self.by_topic.remove(topic)?;
        self.by_id.remove(&id);
        Some(id)
    }

    pub fn topic_for(&self, id: &str) -> Option<&Topic> {
        self.by_id.get(id)
    }

    pub fn contains(&self, topic: &Topic) -> bool {
        self.by_topic.contains_key(topic)
    }

    /// Subscribed topics in a stable order
    pub fn topics(&self) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self.by_topic.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn clear(&mut self) {
        self.by_topic.clear();
        self.by_id.clear();
    }

    pub fn len(&self) -> usize {
        self.by_topic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_topic.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_assigns_fresh_ids() {
        let mut subs = SubscriptionSet::new();
        let (a, replaced_a) = subs.subscribe(Topic::User("alice".into()));
        let (b, replaced_b) = subs.subscribe(Topic::Match("m1".into()));

        assert_ne!(a, b);
        assert!(replaced_a.is_none() && replaced_b.is_none());
        assert_eq!(subs.topic_for(&a), Some(&Topic::User("alice".into())));
        assert_eq!(subs.len(), 2);
    }

    #[test]
    fn test_resubscribe_replaces() {
        let mut subs = SubscriptionSet::new();
        let topic = Topic::Match("m1".into());
        let (first, _) = subs.subscribe(topic.clone());
        let (second, replaced) = subs.subscribe(topic.clone());

        assert_eq!(replaced, Some(first.clone()));
        assert_eq!(subs.len(), 1);
        assert!(subs.topic_for(&first).is_none());
        assert_eq!(subs.topic_for(&second), Some(&topic));
    }

    #[test]
    fn test_unsubscribe_and_clear() {
        let mut subs = SubscriptionSet::new();
        let topic = Topic::Match("m1".into());
        let (id, _) = subs.subscribe(topic.clone());
        subs.subscribe(Topic::User("bob".into()));

        assert_eq!(subs.unsubscribe(&topic), Some(id.clone()));
        assert_eq!(subs.unsubscribe(&topic), None);
        assert!(subs.topic_for(&id).is_none());

        subs.clear();
        assert!(subs.is_empty());
    }

    #[test]
    fn test_ids_not_reused_after_clear() {
        let mut subs = SubscriptionSet::new();
        let (before, _) = subs.subscribe(Topic::User("bob".into()));
        subs.clear();
        let (after, _) = subs.subscribe(Topic::User("bob".into()));
        assert_ne!(before, after);
    }

    #[test]
    fn test_topics_sorted() {
        let mut subs = SubscriptionSet::new();
        subs.subscribe(Topic::Match("b".into()));
        subs.subscribe(Topic::User("z".into()));
        subs.subscribe(Topic::Match("a".into()));
        assert_eq!(
            subs.topics(),
            vec![
                Topic::User("z".into()),
                Topic::Match("a".into()),
                Topic::Match("b".into()),
            ]
        );
    }
}
