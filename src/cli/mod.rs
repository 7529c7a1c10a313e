//! CLI 모듈
//!
//! surro-rag CLI 명령어 정의 및 구현

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::embedding::{BgeM3Client, EMBEDDING_URL_ENV};
use crate::extract::ExtractorRegistry;
use crate::repo::{get_data_dir, KnowledgeRepository, NewKnowledge};
use crate::service::{KnowledgeService, RetrieveOverrides};
use crate::storage::FsObjectStorage;
use crate::vector::{HybridVectorStore, DEFAULT_DENSE_WEIGHT, DEFAULT_SPARSE_WEIGHT};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "surro-rag")]
#[command(version, about = "하이브리드 검색 RAG 백엔드", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 지식베이스 생성
    CreateKb {
        /// 지식베이스 이름 (컬렉션 이름으로도 사용)
        name: String,

        /// 설명
        #[arg(short, long)]
        description: Option<String>,

        /// 검색 방식 (1=의미, 2=전문, 3=하이브리드)
        #[arg(long, default_value = "3")]
        search_type: i32,

        /// 기본 결과 개수
        #[arg(long, default_value = "5")]
        top_k: usize,

        /// 스코어 임계값 (이 값 이하의 결과는 제외)
        #[arg(long, default_value = "0.0")]
        threshold: f32,

        /// 청크 길이 (문자 수)
        #[arg(long, default_value = "512")]
        chunk_length: usize,

        /// 청크 겹침 (문자 수)
        #[arg(long, default_value = "50")]
        overlap: usize,
    },

    /// 파일을 지식베이스에 수집
    Ingest {
        /// 대상 지식베이스 이름
        kb: String,

        /// 수집할 파일 경로
        file: PathBuf,
    },

    /// 지식베이스 검색
    Query {
        /// 대상 지식베이스 이름
        kb: String,

        /// 검색 쿼리
        query: String,

        /// 결과 개수 (지식베이스 설정 덮어쓰기)
        #[arg(short, long)]
        top_k: Option<usize>,

        /// 스코어 임계값 (지식베이스 설정 덮어쓰기)
        #[arg(long)]
        threshold: Option<f32>,
    },

    /// 지식베이스 목록
    List,

    /// 지식베이스의 파일 목록
    Files {
        /// 대상 지식베이스 이름
        kb: String,
    },

    /// 수집된 파일 삭제 (벡터, 원본, 기록 모두)
    DeleteFile {
        /// 대상 지식베이스 이름
        kb: String,

        /// 파일 ID
        id: String,
    },

    /// 지식베이스 삭제
    DropKb {
        /// 대상 지식베이스 이름
        kb: String,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::CreateKb {
            name,
            description,
            search_type,
            top_k,
            threshold,
            chunk_length,
            overlap,
        } => {
            cmd_create_kb(
                name,
                description,
                search_type,
                top_k,
                threshold,
                chunk_length,
                overlap,
            )
            .await
        }
        Commands::Ingest { kb, file } => cmd_ingest(&kb, &file).await,
        Commands::Query {
            kb,
            query,
            top_k,
            threshold,
        } => cmd_query(&kb, &query, top_k, threshold).await,
        Commands::List => cmd_list().await,
        Commands::Files { kb } => cmd_files(&kb).await,
        Commands::DeleteFile { kb, id } => cmd_delete_file(&kb, &id).await,
        Commands::DropKb { kb } => cmd_drop_kb(&kb).await,
        Commands::Status => cmd_status().await,
    }
}

/// 컴포넌트 그래프 구성 - 명령어당 한 번
async fn build_service() -> Result<KnowledgeService> {
    if std::env::var(EMBEDDING_URL_ENV)
        .ok()
        .filter(|v| !v.is_empty())
        .is_none()
    {
        bail!(
            "임베딩 서버 주소가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export {EMBEDDING_URL_ENV}=http://host:port"
        );
    }

    let data_dir = get_data_dir();
    let repo = Arc::new(KnowledgeRepository::open_default().context("메타데이터 저장소 열기 실패")?);
    let vector = Arc::new(
        HybridVectorStore::open_in(&data_dir.join("vectors"))
            .await
            .context("벡터 저장소 열기 실패")?,
    );
    let storage = Arc::new(FsObjectStorage::new(data_dir.join("objects")));
    let embedder = Arc::new(BgeM3Client::from_env().context("임베딩 클라이언트 초기화 실패")?);

    Ok(KnowledgeService::new(repo, vector, embedder, storage))
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 지식베이스 생성 명령어 (create-kb)
async fn cmd_create_kb(
    name: String,
    description: Option<String>,
    search_type: i32,
    top_k: usize,
    threshold: f32,
    chunk_length: usize,
    overlap: usize,
) -> Result<()> {
    let service = build_service().await?;

    println!("[*] 지식베이스 생성 중: {}", name);

    let knowledge = service
        .create_knowledge(NewKnowledge {
            name,
            description,
            search_type_id: search_type,
            top_k,
            score_threshold: threshold,
            chunk_length,
            overlap,
            dense_weight: DEFAULT_DENSE_WEIGHT,
            sparse_weight: DEFAULT_SPARSE_WEIGHT,
        })
        .await
        .context("지식베이스 생성 실패")?;

    println!("[OK] 지식베이스가 생성되었습니다 (ID: {})", knowledge.id);
    println!("     검색 방식: {}, top_k: {}", knowledge.search_type_id, knowledge.top_k);

    Ok(())
}

/// 파일 수집 명령어 (ingest)
async fn cmd_ingest(kb: &str, file: &PathBuf) -> Result<()> {
    let service = build_service().await?;

    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("잘못된 파일 경로: {:?}", file))?;

    println!("[*] 파일 읽는 중: {:?}", file);
    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("파일 읽기 실패: {:?}", file))?;

    println!("[*] 청킹 및 임베딩 생성 중...");
    let outcome = service
        .ingest(kb, filename, &data)
        .await
        .context("파일 수집 실패")?;

    println!(
        "[OK] 파일이 수집되었습니다 (ID: {}, 청크 {}개)",
        outcome.file_id, outcome.chunk_count
    );

    Ok(())
}

/// 검색 명령어 (query)
async fn cmd_query(
    kb: &str,
    query: &str,
    top_k: Option<usize>,
    threshold: Option<f32>,
) -> Result<()> {
    let service = build_service().await?;

    println!("[*] 검색 중: {}", query);

    let results = service
        .retrieve(
            kb,
            query,
            RetrieveOverrides {
                top_k,
                score_threshold: threshold,
            },
        )
        .await
        .context("검색 실패")?;

    if results.is_empty() {
        println!("[!] 임계값을 넘는 결과가 없습니다");
        return Ok(());
    }

    println!("\n[OK] {}건의 결과:\n", results.len());
    for (i, result) in results.iter().enumerate() {
        let preview: String = result.text.chars().take(120).collect();
        println!("{}. (score: {:.4}) {}", i + 1, result.score, preview);
    }

    Ok(())
}

/// 지식베이스 목록 명령어 (list)
async fn cmd_list() -> Result<()> {
    let service = build_service().await?;
    let knowledges = service.list_knowledges()?;

    if knowledges.is_empty() {
        println!("[!] 지식베이스가 없습니다");
        return Ok(());
    }

    println!("[OK] 지식베이스 {}개:\n", knowledges.len());
    for kb in knowledges {
        println!(
            "  {} (검색 방식: {}, top_k: {}, 임계값: {})",
            kb.name, kb.search_type_id, kb.top_k, kb.score_threshold
        );
        if let Some(desc) = kb.description {
            println!("    {}", desc);
        }
    }

    Ok(())
}

/// 파일 목록 명령어 (files)
async fn cmd_files(kb: &str) -> Result<()> {
    let service = build_service().await?;
    let files = service.list_files(kb)?;

    if files.is_empty() {
        println!("[!] 수집된 파일이 없습니다");
        return Ok(());
    }

    println!("[OK] 파일 {}개:\n", files.len());
    for file in files {
        println!(
            "  {} - {} (청크 {}개, {})",
            file.id,
            file.name,
            file.chunk_count,
            file.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    Ok(())
}

/// 파일 삭제 명령어 (delete-file)
async fn cmd_delete_file(kb: &str, id: &str) -> Result<()> {
    let service = build_service().await?;

    let file_id = Uuid::parse_str(id).with_context(|| format!("잘못된 파일 ID: {}", id))?;

    println!("[*] 파일 삭제 중: {}", id);
    service
        .delete_file(kb, file_id)
        .await
        .context("파일 삭제 실패")?;

    println!("[OK] 파일이 삭제되었습니다");
    Ok(())
}

/// 지식베이스 삭제 명령어 (drop-kb)
async fn cmd_drop_kb(kb: &str) -> Result<()> {
    let service = build_service().await?;

    println!("[*] 지식베이스 삭제 중: {}", kb);
    service
        .drop_knowledge(kb)
        .await
        .context("지식베이스 삭제 실패")?;

    println!("[OK] 지식베이스가 삭제되었습니다: {}", kb);
    Ok(())
}

/// 상태 확인 명령어 (status)
async fn cmd_status() -> Result<()> {
    let service = build_service().await?;

    let knowledges = service.list_knowledges()?;
    println!("[*] surro-rag 상태\n");
    println!("  데이터 디렉토리: {:?}", get_data_dir());
    println!(
        "  지원 형식: {}",
        ExtractorRegistry::with_defaults().supported_extensions().join(", ")
    );
    println!("  지식베이스: {}개", knowledges.len());

    for kb in knowledges {
        let files = service.list_files(&kb.name)?;
        let chunks: usize = files.iter().map(|f| f.chunk_count).sum();
        println!("    {} - 파일 {}개, 청크 {}개", kb.name, files.len(), chunks);
    }

    Ok(())
}
