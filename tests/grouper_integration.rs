use arcrelay::grouper::{FileRecord, group_archives};

fn rec(path: &str, name: &str, size: u64) -> FileRecord {
    FileRecord { path: path.to_string(), name: name.to_string(), size }
}

/// 与真实远端列表同形的混合样本：多卷 rar、单卷 7z、
/// 分卷 zip、自解压首卷与大量非归档文件。
fn sample_listing() -> Vec<FileRecord> {
    vec![
        rec("BPFT2/room/Deepest.Chamber.7z", "Deepest.Chamber.7z", 3_017_080_947),
        rec("BPFT2/song/Ghost.Song.v1.2.1.rar", "Ghost.Song.v1.2.1.rar", 1_381_341_174),
        rec("BPFT2/junk/Junkyard.Simulator.part1.rar", "Junkyard.Simulator.part1.rar", 3_221_225_472),
        rec("BPFT2/junk/Junkyard.Simulator.part2.rar", "Junkyard.Simulator.part2.rar", 3_221_225_472),
        rec("BPFT2/junk/Junkyard.Simulator.part3.rar", "Junkyard.Simulator.part3.rar", 372_598_157),
        rec("Game/misc/ready.or.not.zip.012", "ready.or.not.zip.012", 4_290_772_992),
        rec("Game/misc/ready.or.not.zip.011", "ready.or.not.zip.011", 4_290_772_992),
        rec("BPFT2/k10/KAILUO.part01.exe", "KAILUO.part01.exe", 31_457_280),
        rec("BPFT2/k10/KAILUO.part02.rar", "KAILUO.part02.rar", 31_457_280),
        rec("apps/iso/OS X Mavericks 10.9 (GM).iso", "OS X Mavericks 10.9 (GM).iso", 6_041_632_768),
        rec("image/a.webp", "a.webp", 288_622),
        rec("notes/readme.txt", "readme.txt", 103),
        rec("apps/plain/XXXXX520.exe", "XXXXX520.exe", 71_776_723),
    ]
}

#[test]
fn test_grouping_by_family() {
    let groups = group_archives(&sample_listing(), "gd:src", 0).expect("group");
    // iso/webp/txt/裸 exe 都被丢弃
    assert_eq!(groups.len(), 5);

    let junk = &groups["Junkyard.Simulator"];
    assert_eq!(junk.member_paths.len(), 3);
    assert_eq!(junk.total_size, 3_221_225_472 * 2 + 372_598_157);

    let zip = &groups["ready.or.not"];
    assert_eq!(zip.member_paths.len(), 2);

    // sfx 首卷与 rar 续卷合并为同一任务
    let kailuo = &groups["KAILUO"];
    assert_eq!(kailuo.member_paths.len(), 2);

    assert!(groups.contains_key("Deepest.Chamber"));
    assert!(groups.contains_key("Ghost.Song.v1.2.1"));
}

#[test]
fn test_member_paths_are_prefixed_and_sorted() {
    let groups = group_archives(&sample_listing(), "gd:src", 0).expect("group");
    let junk = &groups["Junkyard.Simulator"];
    let paths: Vec<&String> = junk.member_paths.iter().collect();
    assert_eq!(paths[0], "gd:src/BPFT2/junk/Junkyard.Simulator.part1.rar");
    let mut sorted = paths.clone();
    sorted.sort();
    assert_eq!(paths, sorted);
}

#[test]
fn test_depth_mode_keys_by_directory() {
    let groups = group_archives(&sample_listing(), "gd:src", 2).expect("group");
    // 完整路径第 2 个分量是顶层目录（BPFT2/Game）
    assert!(groups.contains_key("BPFT2"));
    assert!(groups.contains_key("Game"));
    // 非归档记录依旧被丢弃
    assert!(!groups.keys().any(|k| k == "image" || k == "apps" || k == "notes"));
}

#[test]
fn test_grouping_twice_yields_identical_result() {
    let listing = sample_listing();
    let a = group_archives(&listing, "gd:src", 0).expect("group");
    let b = group_archives(&listing, "gd:src", 0).expect("group");
    assert_eq!(a.len(), b.len());
    for (key, set) in &a {
        assert_eq!(set.member_paths, b[key].member_paths);
        assert_eq!(set.total_size, b[key].total_size);
    }
}

#[test]
fn test_empty_listing_is_an_error() {
    assert!(group_archives(&[], "gd:src", 0).is_err());
}
