//! Benchmarks for version ordering.

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use promoter::core::{ArtifactType, PublishedArtifact, TagVersionStrategy, VersionSorter, VersioningStrategy};

const VERSIONS: usize = 200;

fn debian_versions() -> Vec<PublishedArtifact> {
    (0..VERSIONS)
        .map(|i| {
            let version = format!("keeldemo-1.{}.{}-h{i}.a1b2c3d", i / 10, i % 10);
            PublishedArtifact::new("keeldemo", ArtifactType::Deb, version)
        })
        .collect()
}

fn docker_versions(strategy: TagVersionStrategy) -> Vec<PublishedArtifact> {
    (0..VERSIONS)
        .map(|i| {
            let tag = match strategy {
                TagVersionStrategy::IncreasingTag => i.to_string(),
                TagVersionStrategy::SemverTag => format!("v1.{}.{}", i / 10, i % 10),
                TagVersionStrategy::BranchJobCommitByJob => format!("master-h{i}.4ea8a9d"),
                TagVersionStrategy::SemverJobCommitByJob | TagVersionStrategy::SemverJobCommitBySemver => {
                    format!("v1.{}.{}-h{i}.4ea8a9d", i / 10, i % 10)
                }
            };
            PublishedArtifact::new("keeldemo", ArtifactType::Docker, tag)
        })
        .collect()
}

fn branch_commit_versions() -> Vec<PublishedArtifact> {
    let start = Utc.with_ymd_and_hms(2020, 3, 25, 12, 0, 0).unwrap();
    (0..VERSIONS)
        .map(|i| {
            let mut artifact = PublishedArtifact::new("keeldemo", ArtifactType::Npm, format!("1.0.0-{i}"));
            artifact.created_at = Some(start + Duration::minutes(i64::try_from(i).unwrap()));
            artifact
        })
        .collect()
}

fn reversed(mut versions: Vec<PublishedArtifact>) -> Vec<PublishedArtifact> {
    versions.reverse();
    versions
}

fn sort_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("sort_versions");

    let netflix = VersionSorter::for_strategy(&VersioningStrategy::NetflixSemver).unwrap();
    let debian = reversed(debian_versions());
    group.bench_function("netflix_semver", |b| {
        b.iter(|| netflix.sort(black_box(debian.clone())))
    });

    for strategy in [
        TagVersionStrategy::IncreasingTag,
        TagVersionStrategy::SemverTag,
        TagVersionStrategy::BranchJobCommitByJob,
        TagVersionStrategy::SemverJobCommitByJob,
        TagVersionStrategy::SemverJobCommitBySemver,
    ] {
        let sorter = VersionSorter::for_strategy(&VersioningStrategy::DockerTag {
            strategy,
            capture_group_regex: None,
        })
        .unwrap();
        let tags = reversed(docker_versions(strategy));
        group.bench_with_input(BenchmarkId::new("docker_tag", strategy), &tags, |b, tags| {
            b.iter(|| sorter.sort(black_box(tags.clone())))
        });
    }

    let by_time = VersionSorter::for_strategy(&VersioningStrategy::BranchCommit).unwrap();
    let npm = reversed(branch_commit_versions());
    group.bench_function("branch_commit", |b| {
        b.iter(|| by_time.sort(black_box(npm.clone())))
    });

    group.finish();
}

criterion_group!(benches, sort_benchmark);
criterion_main!(benches);
