use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, info, warn};
use rayon::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs::{self, File},
    io::BufReader,
    path::{Path, PathBuf},
};

use crate::{
    Analise, ArquivoSped, Codificacao, Enriquecimento, ProdutoExterno, REGEX_SEARCH_SPED,
    SpedError, SpedResult, analisar_decimal, decodificar, normalizar_cfop, parse_decimal,
    so_digitos,
};

/// Tabelas CSV auxiliares aceitas pelo programa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TipoDeArquivo {
    /// `codigo;descricao`
    Cfops,
    /// `chave;fin_nfe`
    FinalidadeNfe,
    /// `ncm;percentual`
    ReducoesNcm,
    /// Itens de NF-e de saída obtidos fora do Sped.
    ProdutosExternos,
    /// Dados cadastrais dos participantes (consulta de CNPJ).
    Participantes,
}

impl TipoDeArquivo {
    pub fn colunas_essenciais(self) -> &'static [&'static str] {
        match self {
            TipoDeArquivo::Cfops => &["codigo", "descricao"],
            TipoDeArquivo::FinalidadeNfe => &["chave", "fin_nfe"],
            TipoDeArquivo::ReducoesNcm => &["ncm", "percentual"],
            TipoDeArquivo::ProdutosExternos => &["codigo", "valor_total"],
            TipoDeArquivo::Participantes => &["cnpj_cpf"],
        }
    }
}

pub fn verificar_existencia_de_colunas_essenciais(
    column_names: &[&str],
    tipo: TipoDeArquivo,
    verbose: bool,
    input_file: &Path,
) -> SpedResult<()> {
    // 1. Validar nomes em branco
    if column_names.iter().any(|name| name.trim().is_empty()) {
        return Err(SpedError::EmptyColumnName {
            arquivo: input_file.to_path_buf(),
        });
    }

    // 2. Validar nomes repetidos
    let mut vista = HashSet::with_capacity(column_names.len());

    for name in column_names {
        if !vista.insert(name) {
            return Err(SpedError::DuplicateColumnName {
                arquivo: input_file.to_path_buf(),
                coluna: name.to_string(),
            });
        }
    }

    // 3. A primeira coluna essencial que não está no cabeçalho
    if let Some(ausente) = tipo
        .colunas_essenciais()
        .iter()
        .find(|&essencial| !column_names.contains(essencial))
    {
        return Err(SpedError::MissingEssentialColumn {
            arquivo: input_file.to_path_buf(),
            coluna: ausente.to_string(),
            tipo,
        });
    }

    if verbose {
        println!("\nArquivo validado: <{}>", input_file.display());
        println!("Tipo: {:?}", tipo);
        for (i, name) in column_names.iter().enumerate() {
            println!("  coluna [{:02}]: '{}'", i + 1, name);
        }
        println!();
    }

    Ok(())
}

/// Linha de uma tabela CSV, com acesso às colunas pelo nome.
struct Linha<'a> {
    indices: &'a HashMap<String, usize>,
    record: &'a csv::StringRecord,
}

impl Linha<'_> {
    /// Conteúdo da coluna; vazio quando a coluna não existe.
    fn get(&self, coluna: &str) -> &str {
        self.indices
            .get(coluna)
            .and_then(|&i| self.record.get(i))
            .unwrap_or_default()
    }
}

/// Lê uma tabela `;` com cabeçalho, chamando `f` para cada linha.
///
/// `f` recebe o número da linha no arquivo (o cabeçalho é a linha 1).
fn ler_tabela<F>(path: &Path, tipo: TipoDeArquivo, verbose: bool, mut f: F) -> SpedResult<usize>
where
    F: FnMut(usize, &Linha) -> SpedResult<()>,
{
    let file = File::open(path).map_err(|source| SpedError::IoReader {
        source,
        arquivo: path.to_path_buf(),
    })?;

    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(true)
        .flexible(false)
        .trim(csv::Trim::All)
        .buffer_capacity(128 * 1024)
        .from_reader(BufReader::new(file));

    let headers = rdr
        .headers()
        .map_err(|e| SpedError::from_csv(e, path.to_path_buf(), 1))?
        .clone();

    // Nomes de coluna sem diferença entre maiúsculas e minúsculas.
    let column_names: Vec<String> = headers.iter().map(str::to_lowercase).collect();
    let column_refs: Vec<&str> = column_names.iter().map(String::as_str).collect();

    verificar_existencia_de_colunas_essenciais(&column_refs, tipo, verbose, path)?;

    let indices: HashMap<String, usize> = column_names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), i))
        .collect();

    let mut record = csv::StringRecord::new();
    let mut count = 0;

    loop {
        let linha = count + 2;
        match rdr.read_record(&mut record) {
            Ok(true) => {
                count += 1;
                f(
                    linha,
                    &Linha {
                        indices: &indices,
                        record: &record,
                    },
                )?;
            }
            Ok(false) => break,
            Err(e) => return Err(SpedError::from_csv(e, path.to_path_buf(), linha)),
        }
    }

    debug!("{:?} <{}>: {} linha(s).", tipo, path.display(), count);

    Ok(count)
}

fn decimal_obrigatorio(valor: &str, campo: &str, path: &Path, linha: usize) -> SpedResult<Decimal> {
    match analisar_decimal(valor) {
        Analise::Valor(decimal) => Ok(decimal),
        Analise::Vazio | Analise::Invalido => Err(SpedError::InvalidDecimal {
            campo: format!("{campo} ({}, linha {linha})", path.display()),
            valor: valor.to_string(),
        }),
    }
}

/// CFOPs adicionais: `codigo;descricao`.
pub fn ler_cfops(path: &Path, verbose: bool) -> SpedResult<BTreeMap<String, String>> {
    let mut cfops = BTreeMap::new();

    ler_tabela(path, TipoDeArquivo::Cfops, verbose, |_, linha| {
        let codigo = normalizar_cfop(linha.get("codigo"));
        if !codigo.is_empty() {
            cfops.insert(codigo, linha.get("descricao").to_string());
        }
        Ok(())
    })?;

    Ok(cfops)
}

/// Finalidade da NF-e por chave de acesso: `chave;fin_nfe`.
pub fn ler_fin_nfe(path: &Path, verbose: bool) -> SpedResult<HashMap<String, String>> {
    let mut mapa = HashMap::new();

    ler_tabela(path, TipoDeArquivo::FinalidadeNfe, verbose, |linha_n, linha| {
        let chave = so_digitos(linha.get("chave"));
        let fin_nfe = linha.get("fin_nfe");

        if chave.len() == 44 && !fin_nfe.is_empty() {
            mapa.insert(chave.into_owned(), fin_nfe.to_string());
        } else {
            warn!(
                "<{}> linha {linha_n}: chave ou finalidade inválida ignorada.",
                path.display()
            );
        }
        Ok(())
    })?;

    Ok(mapa)
}

/// Percentual de redução das alíquotas por NCM: `ncm;percentual`.
pub fn ler_reducoes_ncm(path: &Path, verbose: bool) -> SpedResult<BTreeMap<String, Decimal>> {
    let mut reducoes = BTreeMap::new();

    ler_tabela(path, TipoDeArquivo::ReducoesNcm, verbose, |linha_n, linha| {
        let ncm = so_digitos(linha.get("ncm")).into_owned();
        let percentual = decimal_obrigatorio(linha.get("percentual"), "percentual", path, linha_n)?;

        if !(Decimal::ZERO..=dec!(100)).contains(&percentual) {
            return Err(SpedError::InvalidDecimal {
                campo: format!("percentual entre 0 e 100 ({}, linha {linha_n})", path.display()),
                valor: percentual.to_string(),
            });
        }

        if !ncm.is_empty() {
            reducoes.insert(ncm, percentual);
        }
        Ok(())
    })?;

    Ok(reducoes)
}

/// Itens de NF-e de saída obtidos fora do Sped.
///
/// Colunas: `codigo` e `valor_total` obrigatórias; `chave_nfe`, `descricao`,
/// `ncm`, `cfop`, `quantidade`, `icms`, `icms_st`, `ipi`, `pis` e `cofins`
/// opcionais (valores com vírgula decimal).
pub fn ler_produtos_externos(path: &Path, verbose: bool) -> SpedResult<Vec<ProdutoExterno>> {
    let mut produtos = Vec::new();

    ler_tabela(path, TipoDeArquivo::ProdutosExternos, verbose, |linha_n, linha| {
        let valor = |coluna: &str| parse_decimal(linha.get(coluna), Decimal::ZERO);

        produtos.push(ProdutoExterno {
            chave_nfe: so_digitos(linha.get("chave_nfe")).into_owned(),
            codigo: linha.get("codigo").to_string(),
            descricao: linha.get("descricao").to_string(),
            ncm: so_digitos(linha.get("ncm")).into_owned(),
            cfop: normalizar_cfop(linha.get("cfop")),
            quantidade: valor("quantidade"),
            valor_total: decimal_obrigatorio(linha.get("valor_total"), "valor_total", path, linha_n)?,
            icms: valor("icms"),
            icms_st: valor("icms_st"),
            ipi: valor("ipi"),
            pis: valor("pis"),
            cofins: valor("cofins"),
        });
        Ok(())
    })?;

    Ok(produtos)
}

/// Dados cadastrais dos participantes, indexados pelo CNPJ/CPF (apenas dígitos).
///
/// Colunas: `cnpj_cpf` obrigatória; `uf`, `situacao_cadastral`,
/// `optante_simples`, `optante_mei`, `data_consulta` e `erro_consulta` opcionais.
pub fn ler_enriquecimentos(path: &Path, verbose: bool) -> SpedResult<HashMap<String, Enriquecimento>> {
    let mut mapa = HashMap::new();

    ler_tabela(path, TipoDeArquivo::Participantes, verbose, |_, linha| {
        let documento = so_digitos(linha.get("cnpj_cpf")).into_owned();
        if documento.is_empty() {
            return Ok(());
        }

        let uf = linha.get("uf").to_uppercase();

        mapa.insert(
            documento,
            Enriquecimento {
                uf: Some(uf).filter(|uf| uf.len() == 2),
                situacao_cadastral: linha.get("situacao_cadastral").to_string(),
                optante_simples: parse_booleano(linha.get("optante_simples")),
                optante_mei: parse_booleano(linha.get("optante_mei")),
                data_consulta: parse_data_consulta(linha.get("data_consulta")),
                erro_consulta: linha.get("erro_consulta").to_string(),
            },
        );
        Ok(())
    })?;

    Ok(mapa)
}

/// "S"/"N", "sim"/"não", "true"/"false", "1"/"0". Vazio ou outro conteúdo: desconhecido.
pub fn parse_booleano(texto: &str) -> Option<bool> {
    match texto.trim().to_lowercase().as_str() {
        "s" | "sim" | "true" | "1" => Some(true),
        "n" | "nao" | "não" | "false" | "0" => Some(false),
        _ => None,
    }
}

/// "AAAA-MM-DD HH:MM:SS", "AAAA-MM-DD" ou "DD/MM/AAAA".
fn parse_data_consulta(texto: &str) -> Option<NaiveDateTime> {
    let texto = texto.trim();

    NaiveDateTime::parse_from_str(texto, "%Y-%m-%d %H:%M:%S")
        .ok()
        .or_else(|| {
            ["%Y-%m-%d", "%d/%m/%Y"]
                .iter()
                .find_map(|formato| NaiveDate::parse_from_str(texto, formato).ok())
                .and_then(|data| data.and_hms_opt(0, 0, 0))
        })
}

/// Procura arquivos do Sped EFD (`SPED*.txt` ou `EFD*.txt`) no diretório.
pub fn search_sped_files(dir: &Path) -> SpedResult<Vec<PathBuf>> {
    let mut arquivos: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(SpedError::Io)?
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            let is_match = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|name| REGEX_SEARCH_SPED.is_match(name))
                .unwrap_or_default();

            if path.is_file() && is_match {
                Some(path)
            } else {
                None
            }
        })
        .collect();

    if arquivos.is_empty() {
        return Err(SpedError::NoSpedFilesFound);
    }

    arquivos.sort();

    Ok(arquivos)
}

/// Arquivo do Sped decodificado, com o caminho de origem.
#[derive(Debug, Clone)]
pub struct ArquivoLido {
    pub caminho: PathBuf,
    pub arquivo: ArquivoSped,
}

/// Lê e decodifica os arquivos em paralelo.
///
/// Arquivos com o mesmo conteúdo (mesma impressão digital) são lidos uma
/// única vez; a ordem dos caminhos é mantida.
pub fn ler_arquivos_sped(caminhos: &[PathBuf], codificacao: Codificacao) -> SpedResult<Vec<ArquivoLido>> {
    let lidos: Vec<ArquivoLido> = caminhos
        .par_iter()
        .map(|caminho| {
            let bytes = fs::read(caminho).map_err(|source| SpedError::IoReader {
                source,
                arquivo: caminho.clone(),
            })?;

            Ok(ArquivoLido {
                caminho: caminho.clone(),
                arquivo: decodificar(&bytes, codificacao),
            })
        })
        .collect::<SpedResult<_>>()?;

    let mut vistos = HashSet::new();
    let unicos: Vec<ArquivoLido> = lidos
        .into_iter()
        .filter(|lido| {
            let novo = vistos.insert(lido.arquivo.impressao_digital.clone());
            if !novo {
                warn!("Arquivo repetido ignorado: <{}>", lido.caminho.display());
            }
            novo
        })
        .collect();

    info!("{} arquivo(s) Sped decodificado(s).", unicos.len());

    Ok(unicos)
}
