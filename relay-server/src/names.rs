use proto::PeerId;
use rand::Rng;

/// Short, speakable identifiers like `amber-otter-river-17`.
pub fn generate(rng: &mut impl Rng) -> PeerId {
    let n = WORDS.len();
    PeerId::new(format!(
        "{}-{}-{}-{}",
        WORDS[rng.gen_range(0..n)],
        WORDS[rng.gen_range(0..n)],
        WORDS[rng.gen_range(0..n)],
        rng.gen::<u8>(),
    ))
}

#[rustfmt::skip]
const WORDS: [&str; 64] = [
    "amber", "anchor", "aspen", "badger", "basil", "birch", "bison", "breeze", "brook", "canyon",
    "cedar", "clover", "comet", "coral", "crane", "dune", "ember", "falcon", "fern", "fjord",
    "flint", "gecko", "glade", "harbor", "hazel", "heron", "island", "jasper", "juniper", "kestrel",
    "lagoon", "lark", "lichen", "lotus", "maple", "meadow", "mesa", "moss", "nectar", "orchid",
    "otter", "pebble", "pine", "plover", "quartz", "raven", "reef", "ridge", "river", "sage",
    "sparrow", "spruce", "stone", "summit", "thistle", "tide", "tundra", "valley", "walnut", "willow",
    "wren", "yarrow", "zephyr", "zinnia",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_have_three_words_and_a_number() {
        let mut rng = rand::thread_rng();
        for _ in 0..32 {
            let id = generate(&mut rng);
            let parts: Vec<&str> = id.as_str().split('-').collect();
            assert_eq!(parts.len(), 4, "{id}");
            assert!(parts[..3].iter().all(|word| WORDS.contains(word)));
            assert!(parts[3].parse::<u8>().is_ok());
        }
    }
}
