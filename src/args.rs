use clap::Parser;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use crate::{
    Codificacao, OpcoesValidacao, ParametrosReforma, Periodo, Selecao, SpedError, SpedResult,
    analisar_decimal, search_sped_files, so_digitos,
};

// Estrutura para o Clap processar os argumentos da linha de comando
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Arguments {
    /// Arquivos do Sped EFD ICMS/IPI.
    ///
    /// Se omitidos, são procurados no diretório atual os arquivos
    /// `SPED*.txt` e `EFD*.txt`.
    #[arg(value_name = "SPED")]
    arquivos: Vec<PathBuf>,

    /// Clear screen
    #[arg(short, long, default_value_t = false)]
    clear: bool,

    /// Codificação dos arquivos do Sped
    #[arg(short, long, value_enum, default_value_t = Codificacao::Latin1)]
    encoding: Codificacao,

    /// UF da empresa (se omitida, a UF do registro 0000)
    #[arg(short, long)]
    uf: Option<String>,

    /// Finalidade das NF-e: CSV `chave;fin_nfe`
    #[arg(long)]
    fin_nfe: Option<PathBuf>,

    /// CFOPs adicionais de devolução de venda: CSV `codigo;descricao`
    #[arg(long)]
    cfops_venda: Option<PathBuf>,

    /// CFOPs adicionais de devolução de compra: CSV `codigo;descricao`
    #[arg(long)]
    cfops_compra: Option<PathBuf>,

    /// Aceitar documentos com CFOPs de devolução de venda e de compra
    #[arg(long, default_value_t = false)]
    permitir_misto: bool,

    /// Alertar devolução de venda em saída e devolução de compra em entrada
    #[arg(long, default_value_t = false)]
    verificar_sentido: bool,

    /// Alíquota do IBS (%)
    #[arg(long, value_parser = parse_aliquota, default_value = "18.5")]
    ibs: Decimal,

    /// Alíquota da CBS (%)
    #[arg(long, value_parser = parse_aliquota, default_value = "8.5")]
    cbs: Decimal,

    /// Alíquota do Imposto Seletivo (%)
    #[arg(long = "is", value_parser = parse_aliquota, default_value = "0")]
    imposto_seletivo: Decimal,

    /// Reduções de alíquota por NCM: CSV `ncm;percentual`
    #[arg(long)]
    reducoes_ncm: Option<PathBuf>,

    /// Itens das NF-e de saída obtidos fora do Sped (CSV)
    #[arg(long)]
    produtos_saida: Option<PathBuf>,

    /// Dados cadastrais dos participantes (CSV com a coluna `cnpj_cpf`)
    #[arg(long)]
    participantes: Option<PathBuf>,

    /// CNPJ da empresa do relatório fiscal
    #[arg(long)]
    cnpj: Option<String>,

    /// Período inicial do relatório (AAAA-MM)
    #[arg(long)]
    periodo_inicial: Option<String>,

    /// Período final do relatório (AAAA-MM)
    #[arg(long)]
    periodo_final: Option<String>,

    /// Incluir as filiais (mesma raiz de 8 dígitos do CNPJ)
    #[arg(long, default_value_t = false)]
    filiais: bool,

    /// Imprimir o resultado em JSON
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Ativar modo detalhado (verbose)
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[derive(Debug)]
pub struct Config {
    pub clear: bool,
    pub json: bool,
    pub verbose: bool,

    pub arquivos_sped: Vec<PathBuf>,
    pub codificacao: Codificacao,

    // Validação de devoluções
    pub uf_empresa: Option<String>,
    pub opcoes: OpcoesValidacao,
    pub fin_nfe: Option<PathBuf>,
    pub cfops_venda: Option<PathBuf>,
    pub cfops_compra: Option<PathBuf>,

    // Relatório fiscal
    pub parametros: ParametrosReforma,
    pub reducoes_ncm: Option<PathBuf>,
    pub produtos_saida: Option<PathBuf>,
    pub participantes: Option<PathBuf>,
    pub selecao: Selecao,
}

pub fn get_config() -> SpedResult<Config> {
    build_config(Arguments::parse(), Path::new("."))
}

/// Como `get_config`, mas com os argumentos informados e sem encerrar o
/// processo em caso de erro.
pub fn get_config_from<I, T>(args: I, dir: &Path) -> SpedResult<Config>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args = Arguments::try_parse_from(args).map_err(|e| SpedError::Config(e.to_string()))?;
    build_config(args, dir)
}

fn build_config(args: Arguments, dir: &Path) -> SpedResult<Config> {
    // 1. Arquivos do Sped: os informados ou os encontrados no diretório.
    let arquivos_sped = if args.arquivos.is_empty() {
        let encontrados = search_sped_files(dir)?;

        println!(" Arquivo(s) do Sped EFD encontrado(s) no diretório:\n");
        encontrados.iter().enumerate().for_each(|(i, path)| {
            println!("{:6}: {}", i + 1, path.display());
        });
        println!();

        encontrados
    } else {
        args.arquivos
    };

    // 2. UF da empresa
    let uf_empresa = args
        .uf
        .map(|uf| uf.trim().to_uppercase())
        .map(|uf| {
            if uf.len() == 2 && uf.chars().all(|c| c.is_ascii_alphabetic()) {
                Ok(uf)
            } else {
                Err(SpedError::Config(format!("UF inválida: <{uf}>")))
            }
        })
        .transpose()?;

    // 3. Seleção do relatório fiscal
    let cnpj = args.cnpj.as_deref().map(validar_cnpj).transpose()?;
    let periodo_inicial = args
        .periodo_inicial
        .as_deref()
        .map(str::parse::<Periodo>)
        .transpose()?;
    let periodo_final = args
        .periodo_final
        .as_deref()
        .map(str::parse::<Periodo>)
        .transpose()?;

    if let (Some(inicio), Some(fim)) = (periodo_inicial, periodo_final)
        && inicio > fim
    {
        return Err(SpedError::InvertedPeriod {
            inicio: inicio.to_string(),
            fim: fim.to_string(),
        });
    }

    if args.filiais && cnpj.is_none() {
        return Err(SpedError::Config(
            "A opção --filiais exige o CNPJ da empresa (--cnpj)".into(),
        ));
    }

    Ok(Config {
        clear: args.clear,
        json: args.json,
        verbose: args.verbose,
        arquivos_sped,
        codificacao: args.encoding,
        uf_empresa,
        opcoes: OpcoesValidacao {
            permitir_misto: args.permitir_misto,
            verificar_sentido: args.verificar_sentido,
        },
        fin_nfe: args.fin_nfe,
        cfops_venda: args.cfops_venda,
        cfops_compra: args.cfops_compra,
        parametros: ParametrosReforma {
            aliquota_ibs: args.ibs,
            aliquota_cbs: args.cbs,
            aliquota_is: args.imposto_seletivo,
            ..Default::default()
        },
        reducoes_ncm: args.reducoes_ncm,
        produtos_saida: args.produtos_saida,
        participantes: args.participantes,
        selecao: Selecao {
            cnpj,
            periodo_inicial,
            periodo_final,
            agrupar_filiais: args.filiais,
        },
    })
}

/// CNPJ (14 dígitos) ou CPF (11 dígitos) do declarante, apenas com dígitos.
fn validar_cnpj(texto: &str) -> SpedResult<String> {
    let digitos = so_digitos(texto).into_owned();

    match digitos.len() {
        11 | 14 => Ok(digitos),
        length => Err(SpedError::InvalidCnpj {
            cnpj: texto.to_string(),
            length,
        }),
    }
}

/// Alíquota em %, com ponto ou vírgula decimal, entre 0 e 100.
fn parse_aliquota(texto: &str) -> Result<Decimal, String> {
    let valor = analisar_decimal(texto)
        .valor()
        .ok_or_else(|| format!("valor decimal inválido: <{texto}>"))?;

    if (Decimal::ZERO..=dec!(100)).contains(&valor) {
        Ok(valor)
    } else {
        Err(format!("alíquota fora do intervalo de 0 a 100: {valor}"))
    }
}
